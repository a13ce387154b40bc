//! Token sources for the two supported authentication modes.
//!
//! OAuth runs the installed-application flow of `yup-oauth2` with a client secret downloaded from
//! the Google Cloud console and caches the user's token on disk; service accounts go through
//! `google-cloud-auth`.

use crate::{AppConfig, AuthType};
use async_trait::async_trait;
use google_cloud_auth::credentials::CredentialsFile;
use google_cloud_auth::token::DefaultTokenSourceProvider;
use google_cloud_token::{TokenSource, TokenSourceProvider};
use std::fmt;
use std::fs;
use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use url::Url;
use yup_oauth2::authenticator::DefaultAuthenticator;
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::{ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod};

const CALENDAR_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/calendar.readonly";

/// Used when the client secret lists no redirect URIs.
const DEFAULT_REDIRECT_URI: &str = "http://localhost";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unable to read client secret {}: {source}", path.display())]
    ReadSecret {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no authorization code found in `{0}`")]
    MissingCode(String),

    #[error("oauth flow failed: {0}")]
    OAuth(#[from] yup_oauth2::Error),

    #[error("oauth token response carried no access token")]
    MissingAccessToken,

    #[error("user_credentials is required for OAuth authentication")]
    MissingTokenPath,

    #[error("auth command is only available for OAuth authentication (current: {0})")]
    NotOAuth(AuthType),

    #[error("service account authentication failed: {0}")]
    GCloudAuth(#[from] google_cloud_auth::error::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Extracts the authorization code from the URL the browser was redirected to. A bare code is
/// accepted as well.
pub fn parse_authorization_response(input: &str) -> Result<String, AuthError> {
    let input = input.trim();

    match Url::parse(input) {
        Ok(url) => url
            .query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, code)| code.into_owned())
            .filter(|code| !code.is_empty())
            .ok_or_else(|| AuthError::MissingCode(input.to_owned())),
        Err(_) if !input.is_empty() && !input.contains(char::is_whitespace) => {
            Ok(input.to_owned())
        }
        Err(_) => Err(AuthError::MissingCode(input.to_owned())),
    }
}

/// Shows the consent `url` and reads back the redirected URL (or the bare code) the user pastes.
pub fn prompt_for_code<R, W>(url: &str, input: &mut R, output: &mut W) -> Result<String, AuthError>
where
    R: BufRead,
    W: Write,
{
    writeln!(
        output,
        "Go to the following link in your browser then type the full url: \n{url}"
    )?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;

    let code = parse_authorization_response(&line)?;
    writeln!(output, "Authorization Code: {code}")?;

    Ok(code)
}

/// Prompts on stderr so that stdout only ever carries command output.
struct TerminalFlowDelegate {
    redirect_uri: String,
}

impl InstalledFlowDelegate for TerminalFlowDelegate {
    fn redirect_uri(&self) -> Option<&str> {
        Some(&self.redirect_uri)
    }

    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        _need_code: bool,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>> {
        Box::pin(async move { read_code_from_terminal(url).map_err(|err| err.to_string()) })
    }
}

fn read_code_from_terminal(url: &str) -> Result<String, AuthError> {
    prompt_for_code(url, &mut io::stdin().lock(), &mut io::stderr())
}

async fn read_secret(credentials: &Path) -> Result<ApplicationSecret, AuthError> {
    yup_oauth2::read_application_secret(credentials)
        .await
        .map_err(|source| AuthError::ReadSecret {
            path: credentials.to_path_buf(),
            source,
        })
}

/// Builds the installed-application authenticator. Tokens are read from and written to
/// `token_path`; without a usable token the consent flow runs on the first token request.
async fn installed_flow(
    secret: ApplicationSecret,
    token_path: &Path,
) -> Result<DefaultAuthenticator, AuthError> {
    let redirect_uri = secret
        .redirect_uris
        .first()
        .cloned()
        .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_owned());

    let authenticator =
        InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::Interactive)
            .persist_tokens_to_disk(token_path.to_path_buf())
            .flow_delegate(Box::new(TerminalFlowDelegate { redirect_uri }))
            .build()
            .await?;

    Ok(authenticator)
}

/// Token source backed by a `yup-oauth2` authenticator, which refreshes and persists the cached
/// user token on its own.
pub struct OAuthTokenSource {
    authenticator: DefaultAuthenticator,
}

impl OAuthTokenSource {
    pub fn new(authenticator: DefaultAuthenticator) -> OAuthTokenSource {
        OAuthTokenSource { authenticator }
    }

    async fn authorization_header(&self) -> Result<String, AuthError> {
        let token = self.authenticator.token(&[CALENDAR_READONLY_SCOPE]).await?;
        let access_token = token.token().ok_or(AuthError::MissingAccessToken)?;

        Ok(format!("Bearer {access_token}"))
    }
}

impl fmt::Debug for OAuthTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokenSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for OAuthTokenSource {
    async fn token(&self) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.authorization_header().await?)
    }
}

/// Asks whether an existing token should be replaced. Anything but `y`/`Y` declines.
pub fn confirm_reauthentication<R, W>(
    token_path: &Path,
    input: &mut R,
    output: &mut W,
) -> io::Result<bool>
where
    R: BufRead,
    W: Write,
{
    writeln!(output, "Token file already exists: {}", token_path.display())?;
    write!(output, "Do you want to re-authenticate? [y/N]: ")?;
    output.flush()?;

    let mut response = String::new();
    input.read_line(&mut response)?;

    Ok(matches!(response.trim(), "y" | "Y"))
}

/// The configured way of obtaining API tokens.
#[derive(Debug, Clone)]
pub enum Authenticator {
    OAuth {
        credentials: PathBuf,
        token_path: PathBuf,
    },
    ServiceAccount {
        credentials: PathBuf,
    },
}

impl Authenticator {
    pub fn from_config(config: &AppConfig) -> Result<Authenticator, AuthError> {
        match config.auth_type {
            AuthType::OAuth => Ok(Authenticator::OAuth {
                credentials: config.application_credentials.clone(),
                token_path: config
                    .user_credentials()
                    .ok_or(AuthError::MissingTokenPath)?
                    .to_path_buf(),
            }),
            AuthType::ServiceAccount => Ok(Authenticator::ServiceAccount {
                credentials: config.application_credentials.clone(),
            }),
        }
    }

    /// Produces a token source for the calendar client. Under OAuth without a cached token the
    /// interactive flow runs on stdin/stderr when the first token is requested.
    pub async fn token_source(&self) -> Result<Arc<dyn TokenSource>, AuthError> {
        match self {
            Authenticator::OAuth {
                credentials,
                token_path,
            } => {
                let secret = read_secret(credentials).await?;
                let authenticator = installed_flow(secret, token_path).await?;
                Ok(Arc::new(OAuthTokenSource::new(authenticator)))
            }
            Authenticator::ServiceAccount { credentials } => {
                let scopes = [CALENDAR_READONLY_SCOPE];
                let config = google_cloud_auth::project::Config::default().with_scopes(&scopes);
                let credentials =
                    CredentialsFile::new_from_file(credentials.to_string_lossy().into_owned())
                        .await?;

                let provider =
                    DefaultTokenSourceProvider::new_with_credentials(config, Box::new(credentials))
                        .await?;

                Ok(provider.token_source())
            }
        }
    }
}

/// Runs the `auth` command: (re-)acquires an OAuth user token and stores it in the configured
/// token file. Returns `false` if the user declined to replace an existing token.
pub async fn authenticate<R, W>(
    config: &AppConfig,
    input: &mut R,
    output: &mut W,
) -> Result<bool, AuthError>
where
    R: BufRead,
    W: Write,
{
    let Authenticator::OAuth {
        credentials,
        token_path,
    } = Authenticator::from_config(config)?
    else {
        return Err(AuthError::NotOAuth(config.auth_type));
    };

    let replace = token_path.exists();
    if replace && !confirm_reauthentication(&token_path, input, output)? {
        writeln!(output, "Cancelled.")?;
        return Ok(false);
    }

    let secret = read_secret(&credentials).await?;
    if replace {
        // Otherwise the cached token would be reused instead of running the flow.
        fs::remove_file(&token_path)?;
    }

    let authenticator = installed_flow(secret, &token_path).await?;
    authenticator.token(&[CALENDAR_READONLY_SCOPE]).await?;

    writeln!(output, "Saving credential file to: {}", token_path.display())?;

    Ok(true)
}
