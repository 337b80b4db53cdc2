use bytes::{BufMut, BytesMut};
use httpstatus::StatusCode;
use std::collections::BTreeMap;

pub struct ResponseBuilder {
    status_code: StatusCode,
    content_type: String,
    headers: BTreeMap<String, String>,
    body: BytesMut,
    omit_body: bool,
}

impl Default for ResponseBuilder {
    fn default() -> Self {
        Self {
            status_code: StatusCode::Ok,
            content_type: "text/plain".to_string(),
            headers: BTreeMap::new(),
            body: BytesMut::new(),
            omit_body: false,
        }
    }
}

impl From<ResponseBuilder> for Vec<u8> {
    fn from(builder: ResponseBuilder) -> Self {
        builder.build()
    }
}

impl ResponseBuilder {
    pub fn new() -> Self {
        ResponseBuilder {
            ..Default::default()
        }
    }

    /// The `101 Switching Protocols` response completing a WebSocket upgrade
    pub fn switching_protocols(accept: &str) -> Vec<u8> {
        let mut response = b"HTTP/1.1 101 Switching Protocols\r\n".to_vec();
        response.put_slice(b"Upgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: ");
        response.put_slice(accept.as_bytes());
        response.put_slice(b"\r\n\r\n");
        response
    }

    pub fn status_code(&mut self, status: StatusCode) -> &mut Self {
        self.status_code = status;
        self
    }

    pub fn status(&self) -> u16 {
        self.status_code.as_u16()
    }

    pub fn content_type(&mut self, content_type: String) -> &mut Self {
        self.content_type = content_type;
        self
    }

    pub fn write(&mut self, src: &[u8]) {
        self.body.put_slice(src)
    }

    /// Drops any body written so far
    pub fn clear(&mut self) {
        self.body.clear()
    }

    /// Keep `Content-Length` but leave the body out, as a `HEAD` response does
    pub fn omit_body(&mut self) -> &mut Self {
        self.omit_body = true;
        self
    }

    pub fn set_header(&mut self, key: &str, value: &str) -> Option<()> {
        match self.headers.insert(key.to_string(), value.to_string()) {
            Some(_) => Some(()),
            _ => None,
        }
    }

    pub fn build(&self) -> Vec<u8> {
        // http version
        let mut response = b"HTTP/1.1 ".to_vec();

        // status code
        response.put_slice(self.status_code.as_u16().to_string().as_bytes());
        response.put_slice(b" ");
        response.put(self.status_code.reason_phrase().as_bytes());
        response.put_slice(b"\r\n");

        let content_type = if !self.content_type.is_empty() {
            self.content_type.clone()
        } else {
            "text/plain".to_string()
        };

        // add headers
        let mut headers = self.headers.clone();
        headers.insert("Content-Type".to_string(), content_type);
        headers.insert("Content-Length".to_string(), self.body.len().to_string());

        for (key, val) in &headers {
            response.put_slice(key.as_bytes());
            response.put_slice(b": ");
            response.put_slice(val.as_bytes());
            response.put_slice(b"\r\n");
        }
        response.put_slice(b"\r\n");

        if !self.omit_body {
            response.put_slice(&self.body);
        }
        response
    }
}
