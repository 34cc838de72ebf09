mod helpers;
pub(crate) mod log_capture;
