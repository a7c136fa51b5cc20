use std::sync::Arc;

use crate::ocr::OcrBackend;
use crate::pipeline::Pipeline;
use crate::providers::TranslationProvider;

pub(crate) struct ServerState<B: OcrBackend, P: TranslationProvider> {
    pub(crate) pipeline: Arc<Pipeline<B, P>>,
}

impl<B: OcrBackend, P: TranslationProvider> Clone for ServerState<B, P> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}
