use time::Duration;
use tower_cookies::{cookie::SameSite, Cookie, Cookies};

pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
const SECURE: bool = true;
const HTTP_ONLY: bool = true;
const SAME_SITE: SameSite = SameSite::Strict;

pub struct CookieService;

impl CookieService {
    pub fn set_refresh_token(cookies: &Cookies, token: &str, max_age: std::time::Duration) {
        let max_age = Duration::seconds(max_age.as_secs() as i64);
        cookies.add(Self::create_cookie(REFRESH_TOKEN_COOKIE, token.to_string(), max_age));
    }

    pub fn clear_refresh_token(cookies: &Cookies) {
        cookies.remove(Self::create_cookie(REFRESH_TOKEN_COOKIE, String::new(), Duration::ZERO));
    }

    pub fn refresh_token(cookies: &Cookies) -> Option<String> {
        cookies
            .get(REFRESH_TOKEN_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    }

    fn create_cookie(name: &'static str, value: String, max_age: Duration) -> Cookie<'static> {
        Cookie::build((name, value))
            .secure(SECURE)
            .http_only(HTTP_ONLY)
            .same_site(SAME_SITE)
            .path("/")
            .max_age(max_age)
            .build()
    }
}
