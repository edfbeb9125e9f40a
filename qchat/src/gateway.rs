//! Resilient client for the remote encryption oracle.
//!
//! A [`CipherOracle`] performs exactly one encrypt or decrypt call.
//! [`EncryptionGateway`] wraps any oracle with the retry policy: each
//! attempt is bounded by a timeout, attempts are separated by a fixed pause,
//! and exhaustion is reported as [`GatewayError::ServiceUnavailable`].
//!
//! [`HttpOracle`] is the production oracle, speaking JSON over HTTP.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use qchat_proto::bits::BitString;
use qchat_proto::oracle::{
    DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse, ErrorBody,
};

use crate::keys::SharedKey;

/// Errors from a single oracle attempt.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// The attempt did not complete within its time budget.
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),

    /// The request could not be sent or the response could not be read.
    #[error("oracle transport error: {0}")]
    Transport(String),

    /// The oracle answered with a non-success status.
    #[error("oracle returned HTTP {status}: {detail}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error detail from the response body.
        detail: String,
    },

    /// The response body was not the expected JSON.
    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),

    /// The oracle client could not be constructed.
    #[error("oracle client setup failed: {0}")]
    Setup(String),
}

/// Which oracle operation is being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `bits, key -> cipher bits`.
    Encrypt,
    /// `cipher bits, key -> bits`.
    Decrypt,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encrypt => f.write_str("encryption"),
            Self::Decrypt => f.write_str("decryption"),
        }
    }
}

/// Errors reported by [`EncryptionGateway`].
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Every attempt failed.
    #[error("{operation} service unavailable after {attempts} attempts: {last}")]
    ServiceUnavailable {
        /// The operation that failed.
        operation: Operation,
        /// Number of attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last: OracleError,
    },
}

/// One-shot access to an encryption oracle.
///
/// The oracle is treated as a black box that deterministically inverts its
/// own output when given the same key.
pub trait CipherOracle: Send + Sync {
    /// Encrypts `bits` under `key`.
    fn encrypt(
        &self,
        bits: &BitString,
        key: &SharedKey,
    ) -> impl Future<Output = Result<BitString, OracleError>> + Send;

    /// Decrypts `bits` under `key`.
    fn decrypt(
        &self,
        bits: &BitString,
        key: &SharedKey,
    ) -> impl Future<Output = Result<BitString, OracleError>> + Send;
}

/// Attempt budget for oracle calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per operation (at least one is always made).
    pub max_attempts: u32,
    /// Time budget for a single attempt.
    pub attempt_timeout: Duration,
    /// Pause between a failed attempt and the next one.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Retrying front for a [`CipherOracle`].
pub struct EncryptionGateway<O: CipherOracle> {
    oracle: O,
    policy: RetryPolicy,
}

impl<O: CipherOracle> EncryptionGateway<O> {
    /// Wraps `oracle` with `policy`.
    #[must_use]
    pub const fn new(oracle: O, policy: RetryPolicy) -> Self {
        Self { oracle, policy }
    }

    /// Encrypts compressed message bits.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ServiceUnavailable`] once all attempts fail.
    pub async fn encrypt(&self, bits: &BitString, key: &SharedKey) -> Result<BitString, GatewayError> {
        self.with_retry(Operation::Encrypt, || self.oracle.encrypt(bits, key))
            .await
    }

    /// Decrypts a stored payload.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ServiceUnavailable`] once all attempts fail.
    pub async fn decrypt(&self, bits: &BitString, key: &SharedKey) -> Result<BitString, GatewayError> {
        self.with_retry(Operation::Decrypt, || self.oracle.decrypt(bits, key))
            .await
    }

    /// The wrapped oracle.
    #[must_use]
    pub const fn oracle(&self) -> &O {
        &self.oracle
    }

    /// The retry policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn with_retry<F, Fut>(
        &self,
        operation: Operation,
        mut attempt_call: F,
    ) -> Result<BitString, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<BitString, OracleError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::time::timeout(self.policy.attempt_timeout, attempt_call())
                .await
                .unwrap_or(Err(OracleError::Timeout(self.policy.attempt_timeout)));

            match result {
                Ok(bits) => {
                    tracing::debug!(%operation, attempt, bits = bits.len(), "oracle call succeeded");
                    return Ok(bits);
                }
                Err(last) if attempt >= max_attempts => {
                    tracing::error!(%operation, attempt, error = %last, "oracle unavailable, giving up");
                    return Err(GatewayError::ServiceUnavailable {
                        operation,
                        attempts: attempt,
                        last,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        %operation,
                        attempt,
                        max_attempts,
                        error = %e,
                        "oracle attempt failed, will retry"
                    );
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
            }
        }
    }
}

/// [`CipherOracle`] reached over HTTP at `{base}/encrypt` and `{base}/decrypt`.
pub struct HttpOracle {
    encrypt_url: Url,
    decrypt_url: Url,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpOracle {
    /// Creates a client for the oracle at `base_url`.
    ///
    /// `timeout` bounds each HTTP request; the gateway applies its own
    /// per-attempt timeout on top.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::Setup`] if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OracleError> {
        let mut base = Url::parse(base_url.trim())
            .map_err(|e| OracleError::Setup(format!("invalid oracle url {base_url:?}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let join = |endpoint: &str| {
            base.join(endpoint)
                .map_err(|e| OracleError::Setup(format!("invalid oracle endpoint {endpoint}: {e}")))
        };
        let encrypt_url = join("encrypt")?;
        let decrypt_url = join("decrypt")?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Setup(format!("failed to build oracle http client: {e}")))?;

        Ok(Self {
            encrypt_url,
            decrypt_url,
            timeout,
            http,
        })
    }

    /// Endpoint used for encryption.
    #[must_use]
    pub const fn encrypt_url(&self) -> &Url {
        &self.encrypt_url
    }

    /// Endpoint used for decryption.
    #[must_use]
    pub const fn decrypt_url(&self) -> &Url {
        &self.decrypt_url
    }

    async fn post<Req, Resp>(&self, url: &Url, body: &Req) -> Result<Resp, OracleError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let response = self
            .http
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout(self.timeout)
                } else {
                    OracleError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OracleError::Transport(format!("failed to read oracle response: {e}")))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorBody>(&text).map_or_else(
                |_| truncate_for_error(&text),
                |body| body.details.unwrap_or(body.error),
            );
            return Err(OracleError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            OracleError::InvalidResponse(format!("{e} (body={})", truncate_for_error(&text)))
        })
    }
}

impl CipherOracle for HttpOracle {
    async fn encrypt(&self, bits: &BitString, key: &SharedKey) -> Result<BitString, OracleError> {
        let body = EncryptRequest {
            binary: bits.clone(),
            shared_key: key.as_bits().clone(),
        };
        let response: EncryptResponse = self.post(&self.encrypt_url, &body).await?;
        Ok(response.encrypted)
    }

    async fn decrypt(&self, bits: &BitString, key: &SharedKey) -> Result<BitString, OracleError> {
        let body = DecryptRequest {
            encrypted_binary: bits.clone(),
            shared_key: key.as_bits().clone(),
        };
        let response: DecryptResponse = self.post(&self.decrypt_url, &body).await?;
        Ok(response.decrypted)
    }
}

fn truncate_for_error(value: &str) -> String {
    const LIMIT: usize = 400;
    if value.chars().count() <= LIMIT {
        value.to_string()
    } else {
        format!("{}...", value.chars().take(LIMIT).collect::<String>())
    }
}
