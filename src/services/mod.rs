pub mod derivative_service;
pub mod event_service;
pub mod image_codec;
pub mod invocation_log;
pub mod storage_service;
