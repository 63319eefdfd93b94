#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Malformed payload for event '{tag}': {source}")]
    MalformedPayload {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}
