use crate::config::{
    DEFAULT_ACCESS_COOKIE_NAME, DEFAULT_PUBLIC_URL, DEFAULT_REFRESH_COOKIE_NAME,
    DEFAULT_REFRESH_COOKIE_PATH,
};
use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_PUBLIC_URL: &str = "public-url";
pub const ARG_ACCESS_COOKIE_NAME: &str = "access-cookie-name";
pub const ARG_REFRESH_COOKIE_NAME: &str = "refresh-cookie-name";
pub const ARG_REFRESH_COOKIE_PATH: &str = "refresh-cookie-path";
pub const ARG_COOKIE_DOMAIN: &str = "cookie-domain";
pub const ARG_INSECURE_COOKIES: &str = "insecure-cookies";
pub const ARG_LOGIN_URL: &str = "login-url";
pub const ARG_REFRESH_URL: &str = "refresh-url";
pub const ARG_ALLOWED_REDIRECT_DOMAINS: &str = "allowed-redirect-domains";
pub const ARG_LOGIN_BY_EMAIL: &str = "login-by-email";

#[derive(Debug, Clone)]
pub struct Options {
    pub public_url: String,
    pub access_cookie_name: String,
    pub refresh_cookie_name: String,
    pub refresh_cookie_path: String,
    pub cookie_domain: Option<String>,
    pub secure: bool,
    pub login_url: Option<String>,
    pub refresh_url: Option<String>,
    pub allowed_redirect_domains: Vec<String>,
    pub login_by_email: bool,
}

impl Options {
    /// Parse session cookie and redirect arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a URL template lacks the `%s` placeholder.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };
        let get_or = |id: &str, default: &str| get_non_empty(id).unwrap_or_else(|| default.to_string());

        let login_url = get_non_empty(ARG_LOGIN_URL);
        let refresh_url = get_non_empty(ARG_REFRESH_URL);
        for (arg, template) in [(ARG_LOGIN_URL, &login_url), (ARG_REFRESH_URL, &refresh_url)] {
            if let Some(template) = template
                && !template.contains("%s")
            {
                anyhow::bail!("--{arg} must contain a %s placeholder: {template}");
            }
        }

        Ok(Self {
            public_url: get_or(ARG_PUBLIC_URL, DEFAULT_PUBLIC_URL)
                .trim_end_matches('/')
                .to_string(),
            access_cookie_name: get_or(ARG_ACCESS_COOKIE_NAME, DEFAULT_ACCESS_COOKIE_NAME),
            refresh_cookie_name: get_or(ARG_REFRESH_COOKIE_NAME, DEFAULT_REFRESH_COOKIE_NAME),
            refresh_cookie_path: get_or(ARG_REFRESH_COOKIE_PATH, DEFAULT_REFRESH_COOKIE_PATH),
            cookie_domain: get_non_empty(ARG_COOKIE_DOMAIN),
            secure: !matches.get_flag(ARG_INSECURE_COOKIES),
            login_url,
            refresh_url,
            allowed_redirect_domains: matches
                .get_many::<String>(ARG_ALLOWED_REDIRECT_DOMAINS)
                .map(|values| {
                    values
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            login_by_email: matches.get_flag(ARG_LOGIN_BY_EMAIL),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PUBLIC_URL)
                .long(ARG_PUBLIC_URL)
                .help("Externally reachable base URL of this service")
                .env("PORTCULLIS_PUBLIC_URL")
                .default_value(DEFAULT_PUBLIC_URL),
        )
        .arg(
            Arg::new(ARG_ACCESS_COOKIE_NAME)
                .long(ARG_ACCESS_COOKIE_NAME)
                .help("Access token cookie name")
                .env("PORTCULLIS_ACCESS_COOKIE_NAME")
                .default_value(DEFAULT_ACCESS_COOKIE_NAME),
        )
        .arg(
            Arg::new(ARG_REFRESH_COOKIE_NAME)
                .long(ARG_REFRESH_COOKIE_NAME)
                .help("Refresh token cookie name")
                .env("PORTCULLIS_REFRESH_COOKIE_NAME")
                .default_value(DEFAULT_REFRESH_COOKIE_NAME),
        )
        .arg(
            Arg::new(ARG_REFRESH_COOKIE_PATH)
                .long(ARG_REFRESH_COOKIE_PATH)
                .help("Path the refresh cookie is scoped to")
                .env("PORTCULLIS_REFRESH_COOKIE_PATH")
                .default_value(DEFAULT_REFRESH_COOKIE_PATH),
        )
        .arg(
            Arg::new(ARG_COOKIE_DOMAIN)
                .long(ARG_COOKIE_DOMAIN)
                .help("Domain attribute for both cookies")
                .env("PORTCULLIS_COOKIE_DOMAIN"),
        )
        .arg(
            Arg::new(ARG_INSECURE_COOKIES)
                .long(ARG_INSECURE_COOKIES)
                .help("Omit the Secure attribute (local development over plain HTTP)")
                .env("PORTCULLIS_INSECURE_COOKIES")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_LOGIN_URL)
                .long(ARG_LOGIN_URL)
                .help("Login page URL template; %s receives the base64url redirect target")
                .env("PORTCULLIS_LOGIN_URL"),
        )
        .arg(
            Arg::new(ARG_REFRESH_URL)
                .long(ARG_REFRESH_URL)
                .help("Refresh page URL template; %s receives the base64url redirect target")
                .env("PORTCULLIS_REFRESH_URL"),
        )
        .arg(
            Arg::new(ARG_ALLOWED_REDIRECT_DOMAINS)
                .long(ARG_ALLOWED_REDIRECT_DOMAINS)
                .help("Comma separated hosts allowed as post-login redirects; a leading '.' allows subdomains")
                .env("PORTCULLIS_ALLOWED_REDIRECT_DOMAINS")
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_LOGIN_BY_EMAIL)
                .long(ARG_LOGIN_BY_EMAIL)
                .help("Accept a verified email address in place of the username")
                .env("PORTCULLIS_LOGIN_BY_EMAIL")
                .action(ArgAction::SetTrue),
        )
}
