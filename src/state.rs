//! Shared application state handed to every handler.

use crate::services::{
    derivative_service::DerivativeGenerator, image_codec::RasterCodec,
    storage_service::StorageService,
};
use std::sync::Arc;

pub type Generator = DerivativeGenerator<StorageService, RasterCodec>;

#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub generator: Arc<Generator>,
}
