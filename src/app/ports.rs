use async_trait::async_trait;

/// Network access of the raw stage. Transport failures are reported as
/// text; HTTP error statuses come back as a normal response.
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpGetResult, String>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub content_length: u64,
}

impl HttpGetResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body of a 2xx response; any other status is an error naming `url`.
    pub fn into_body(self, url: &str) -> Result<Vec<u8>, String> {
        if self.is_success() {
            Ok(self.bytes)
        } else {
            Err(format!("{} responded with status {}", url, self.status))
        }
    }
}
