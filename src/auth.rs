//! Basic and Digest authentication (RFC 2617, applied to RTSP per RFC 2326 §16).
//!
//! A 401 response carries a `WWW-Authenticate` challenge; this module parses
//! it, builds the matching `Authorization` header, and drives exactly one
//! authenticated retry per challenge instance through the transaction engine.
//!
//! Digest support is MD5 only (the algorithm every RTSP camera and server in
//! the field actually uses); other algorithms are reported and left
//! unanswered rather than failing the transaction.

use base64::prelude::{BASE64_STANDARD, Engine as _};
use md5::{Digest as _, Md5};
use rand::RngExt;

use crate::error::{Result, RtspClientError};
use crate::protocol::RtspMessage;
use crate::session::ClientSession;

/// Ceiling on authenticated retries per session, independent of the `stale`
/// flag. A server issuing `stale=true` on every challenge would otherwise
/// keep the retry loop alive forever.
pub const MAX_AUTH_RETRIES: u32 = 3;

/// Username/password pair presented to the server.
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: &str, password: &str) -> Self {
        Credential {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

/// Authentication scheme negotiated with the server (RFC 2617 §2, §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthScheme {
    /// No authentication configured.
    #[default]
    None,
    /// `Authorization: Basic base64(user:pass)`.
    Basic,
    /// MD5 challenge/response; computed lazily when the server challenges.
    Digest,
}

/// A parsed `WWW-Authenticate` challenge (RFC 2617 §3.2.1).
#[derive(Debug, Clone, Default)]
pub struct AuthChallenge {
    pub scheme: AuthScheme,
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub qop: Option<String>,
    pub algorithm: Option<String>,
    pub cnonce: Option<String>,
    pub nc: Option<String>,
    /// Server says the nonce expired but the credentials were fine; a
    /// fresh-nonce retry is allowed even after credentials were tried.
    pub stale: bool,
}

impl AuthChallenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// Accepted forms:
    ///
    /// ```text
    /// Basic realm="streaming"
    /// Digest realm="streaming", nonce="abc", qop="auth", stale=true
    /// ```
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let (scheme_token, params) = header
            .split_once(char::is_whitespace)
            .unwrap_or((header, ""));

        let mut challenge = AuthChallenge {
            scheme: match scheme_token.to_ascii_lowercase().as_str() {
                "basic" => AuthScheme::Basic,
                "digest" => AuthScheme::Digest,
                other => {
                    return Err(RtspClientError::Challenge(format!(
                        "unknown scheme: {other}"
                    )));
                }
            },
            ..Default::default()
        };

        for part in split_params(params) {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().trim_matches('"');

            match key.as_str() {
                "realm" => challenge.realm = value.to_string(),
                "nonce" => challenge.nonce = value.to_string(),
                "opaque" => challenge.opaque = Some(value.to_string()),
                "qop" => challenge.qop = Some(value.to_string()),
                "algorithm" => challenge.algorithm = Some(value.to_string()),
                "cnonce" => challenge.cnonce = Some(value.to_string()),
                "nc" => challenge.nc = Some(value.to_string()),
                "stale" => challenge.stale = value.eq_ignore_ascii_case("true"),
                _ => tracing::trace!(key = %key, value, "ignoring challenge parameter"),
            }
        }

        if challenge.scheme == AuthScheme::Digest
            && (challenge.realm.is_empty() || challenge.nonce.is_empty())
        {
            return Err(RtspClientError::Challenge(format!(
                "digest challenge missing realm or nonce: {header}"
            )));
        }

        Ok(challenge)
    }
}

/// Split challenge parameters on commas, but not commas inside quoted
/// strings (`qop="auth,auth-int"` is one parameter).
fn split_params(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, b) in params.bytes().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                parts.push(params[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = params[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}

/// Build a `Basic` authorization value (RFC 2617 §2).
pub fn basic_authorization(credential: &Credential) -> String {
    let pair = format!("{}:{}", credential.username, credential.password);
    format!("Basic {}", BASE64_STANDARD.encode(pair.as_bytes()))
}

/// Build a `Digest` authorization value (RFC 2617 §3.2.2).
///
/// MD5 only; the `qop=auth` form uses `nc` from the challenge (default
/// `00000001`) and the supplied client nonce.
pub fn digest_authorization(
    method: &str,
    uri: &str,
    credential: &Credential,
    challenge: &AuthChallenge,
    cnonce: &str,
) -> Result<String> {
    if let Some(algorithm) = &challenge.algorithm {
        if !algorithm.eq_ignore_ascii_case("md5") {
            return Err(RtspClientError::UnsupportedAlgorithm(algorithm.clone()));
        }
    }

    let ha1 = md5_hex(&format!(
        "{}:{}:{}",
        credential.username, challenge.realm, credential.password
    ));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));

    let nc = challenge.nc.as_deref().unwrap_or("00000001");
    let uses_qop = challenge
        .qop
        .as_deref()
        .is_some_and(|q| q.split(',').any(|t| t.trim().eq_ignore_ascii_case("auth")));

    let response = if uses_qop {
        md5_hex(&format!(
            "{}:{}:{}:{}:auth:{}",
            ha1, challenge.nonce, nc, cnonce, ha2
        ))
    } else {
        md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2))
    };

    let mut value = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
        credential.username, challenge.realm, challenge.nonce, uri, response
    );
    if uses_qop {
        value.push_str(&format!(", qop=auth, nc={}, cnonce=\"{}\"", nc, cnonce));
    }
    if let Some(opaque) = &challenge.opaque {
        value.push_str(&format!(", opaque=\"{}\"", opaque));
    }
    if challenge.algorithm.is_some() {
        value.push_str(", algorithm=MD5");
    }
    Ok(value)
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", Md5::digest(input.as_bytes()))
}

fn random_cnonce() -> String {
    format!("{:08x}", rand::rng().random::<u32>())
}

/// Mutable authentication state carried by a session.
#[derive(Debug, Default)]
pub(crate) struct AuthState {
    /// Last computed Authorization value, reattached to subsequent requests
    /// until a disconnect clears it.
    pub cached_authorization: Option<String>,
    /// The configured credential has been presented at least once.
    pub tried_credentials: bool,
    /// Authenticated retries performed so far, bounded by
    /// [`MAX_AUTH_RETRIES`].
    pub retries: u32,
}

impl ClientSession {
    /// Answer a 401 challenge with exactly one authenticated retry.
    ///
    /// Returns the original response unchanged when the credentials were
    /// already tried against a non-stale challenge, when the retry ceiling
    /// is hit, or when the challenge cannot be answered — callers inspect
    /// the status code. Otherwise the request is re-submitted through
    /// [`send_message`](Self::send_message) with fresh CSeq/Timestamp
    /// headers and that result is returned directly.
    pub fn authenticate(
        &self,
        request: Option<RtspMessage>,
        response: RtspMessage,
        force: bool,
    ) -> Result<Option<RtspMessage>> {
        let Some(mut request) = request else {
            return Ok(Some(response));
        };
        let Some(header) = response.get_header("WWW-Authenticate").map(str::to_string) else {
            tracing::warn!("401 response without WWW-Authenticate header");
            return Ok(Some(response));
        };

        let challenge = match AuthChallenge::parse(&header) {
            Ok(challenge) => challenge,
            Err(e) => {
                tracing::warn!(error = %e, header = %header, "ignoring unusable challenge");
                return Ok(Some(response));
            }
        };

        {
            let mut auth = self.auth.lock();
            if !force && auth.tried_credentials && !challenge.stale {
                tracing::debug!("credentials already tried against a fresh challenge");
                return Ok(Some(response));
            }
            if auth.retries >= MAX_AUTH_RETRIES {
                tracing::warn!(retries = auth.retries, "authentication retry ceiling reached");
                return Ok(Some(response));
            }
            auth.retries += 1;
            auth.tried_credentials = true;
        }

        let Some(credential) = self.config.credential.as_ref() else {
            tracing::warn!("server challenged but no credential configured");
            return Ok(Some(response));
        };

        let value = match challenge.scheme {
            AuthScheme::Basic => basic_authorization(credential),
            AuthScheme::Digest => {
                let cnonce = challenge.cnonce.clone().unwrap_or_else(random_cnonce);
                match digest_authorization(
                    &request.method,
                    &request.uri,
                    credential,
                    &challenge,
                    &cnonce,
                ) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot answer digest challenge");
                        return Ok(Some(response));
                    }
                }
            }
            AuthScheme::None => return Ok(Some(response)),
        };

        tracing::debug!(scheme = ?challenge.scheme, realm = %challenge.realm, "retrying with authorization");
        request.set_header("Authorization", &value);
        self.auth.lock().cached_authorization = Some(value);

        // Fresh CSeq and Timestamp on the retried request.
        request.remove_header("CSeq");
        request.remove_header("Timestamp");
        request.clear_transferred();
        self.send_message(Some(request), true, true)
    }
}
