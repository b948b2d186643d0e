use crate::dispatcher::{HandlerRequest, HandlerResponse};
use serde_json::json;

/// Development handler: answers with the decoded inputs it received.
///
/// Uploads are described but not completed, so their files are removed
/// when the request ends.
pub fn echo_handler(req: HandlerRequest) {
    let upload = req
        .upload
        .as_ref()
        .and_then(|t| serde_json::to_value(t.descriptor()).ok());
    let response = HandlerResponse::json(
        200,
        json!({
            "handler": req.handler_name,
            "method": req.method.to_string(),
            "path": req.path,
            "params": req.path_params,
            "query": req.query_params,
            "body": req.body,
            "rawBodyBytes": req.raw_body.as_ref().map(|b| b.len()),
            "upload": upload,
        }),
    );
    req.respond(response);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::RequestId;
    use http::Method;
    use serde_json::Map;

    #[test]
    fn test_echo_reflects_inputs() {
        let (tx, rx) = may::sync::mpsc::channel();
        let mut path_params = Map::new();
        path_params.insert("id".into(), json!(7));
        echo_handler(HandlerRequest {
            request_id: RequestId::new(),
            method: Method::POST,
            path: "/api/items/7".into(),
            handler_name: "post_item".into(),
            path_params,
            query_params: Map::new(),
            headers: Default::default(),
            cookies: Default::default(),
            body: Some(json!({"a": 1})),
            raw_body: None,
            upload: None,
            reply_tx: tx,
        });
        let resp = rx.recv().unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["params"]["id"], 7);
        assert_eq!(resp.body["body"], json!({"a": 1}));
        assert!(resp.body["upload"].is_null());
    }
}
