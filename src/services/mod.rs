pub mod auth_service;
pub mod cookie_service;
pub mod email_worker;
pub mod jwt_service;
pub mod login_throttle;
pub mod mail_service;
pub mod queue;
pub mod user_service;
