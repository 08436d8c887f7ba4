use bytes::Bytes;

use crate::config::AppConfig;
use crate::protocol::openai_chat::ModelList;

/// Serialized `/v1/models` body, built once at startup.
pub(crate) struct ModelsCache {
    body: Bytes,
}

impl ModelsCache {
    #[must_use]
    pub(crate) fn new(config: &AppConfig, created: u64) -> Self {
        Self {
            body: build_models_response_body(config, created),
        }
    }

    #[must_use]
    pub(crate) fn body(&self) -> Bytes {
        self.body.clone()
    }
}

fn build_models_response_body(config: &AppConfig, created: u64) -> Bytes {
    let list = ModelList::from_ids(
        config.models.supported.iter().map(|model| model.trim()),
        created,
    );
    serde_json::to_vec(&list).map_or_else(
        |_| Bytes::from_static(br#"{"object":"list","data":[]}"#),
        Bytes::from,
    )
}
