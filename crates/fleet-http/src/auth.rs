//! HTTP Basic auth for the side-channel handlers (spec §4.5): credentials go
//! through the same `StateStore::check_credentials` the RPC login path uses
//! (`fleet-dispatch::login`), but only human-user tags are accepted here —
//! agent credentials are rejected even if otherwise valid.

use std::sync::Arc;

use fleet_core::auth::Authenticator;
use fleet_core::error::{codes, CoreError, ErrorCategory};
use fleet_core::model::{Credential, SecretString, Tag};
use fleet_core::state::StateStore;

fn unauthorized() -> CoreError {
    CoreError::new(
        codes::UNAUTHORIZED,
        ErrorCategory::Authorization,
        "invalid entity name or password",
    )
}

/// Decode an `Authorization: Basic <base64>` header value into a `Credential`.
fn decode_basic_header(value: &str) -> Result<Credential, CoreError> {
    let encoded = value.strip_prefix("Basic ").ok_or_else(unauthorized)?;
    let decoded = base64_decode(encoded.trim()).ok_or_else(unauthorized)?;
    let text = String::from_utf8(decoded).map_err(|_| unauthorized())?;
    let (user, password) = text.split_once(':').ok_or_else(unauthorized)?;
    let tag: Tag = user.parse().map_err(|_| unauthorized())?;
    Ok(Credential {
        tag,
        password: SecretString::new(password.to_string()),
        nonce: None,
    })
}

/// Validate the `Authorization` header on a side-channel request, requiring
/// a human-user tag. Returns the authenticator on success.
pub async fn require_human_user(
    state: &Arc<dyn StateStore>,
    authorization_header: Option<&str>,
) -> Result<Arc<dyn Authenticator>, CoreError> {
    let header = authorization_header.ok_or_else(unauthorized)?;
    let credential = decode_basic_header(header)?;
    let authenticator = state.check_credentials(&credential).await?;
    if !authenticator.tag().is_user() {
        return Err(unauthorized());
    }
    Ok(authenticator)
}

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// A small standalone base64 decoder. HTTP Basic auth is the only place
/// this workspace needs base64, so it isn't worth a dependency — the
/// alphabet and padding rules are fixed and this is a handful of lines.
fn base64_decode(input: &str) -> Option<Vec<u8>> {
    let input = input.trim_end_matches('=');
    let mut out = Vec::with_capacity(input.len() * 3 / 4 + 1);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for byte in input.bytes() {
        let value = ALPHABET.iter().position(|&c| c == byte)? as u32;
        buffer = (buffer << 6) | value;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::auth::UserAuthenticator;
    use fleet_core::future::BoxFuture;
    use fleet_core::model::HostPort;
    use fleet_core::state::{CharmUrl, Life, StatusSnapshot};

    struct FixedStore;

    impl StateStore for FixedStore {
        fn check_credentials(
            &self,
            credential: &Credential,
        ) -> BoxFuture<'_, Result<Arc<dyn Authenticator>, CoreError>> {
            let tag = credential.tag.clone();
            let ok = credential.password.expose() == "secret" && tag.is_user();
            Box::pin(async move {
                if ok {
                    Ok(Arc::new(UserAuthenticator::new(tag)) as Arc<dyn Authenticator>)
                } else {
                    Err(unauthorized())
                }
            })
        }
        fn api_host_ports(&self) -> BoxFuture<'_, Result<Vec<HostPort>, CoreError>> {
            Box::pin(async { Ok(Vec::new()) })
        }
        fn promote_machine_credential(&self, _tag: &Tag) -> BoxFuture<'_, Result<(), CoreError>> {
            Box::pin(async { Ok(()) })
        }
        fn entity_life(&self, _tag: &Tag) -> BoxFuture<'_, Result<Life, CoreError>> {
            Box::pin(async { Ok(Life::Alive) })
        }
        fn can_access(&self, _requester: &Tag, _target: &Tag) -> BoxFuture<'_, Result<bool, CoreError>> {
            Box::pin(async { Ok(true) })
        }
        fn watch_life(
            &self,
            _tag: &Tag,
        ) -> BoxFuture<'_, Result<(Life, fleet_core::future::BoxStream<'static, Life>), CoreError>> {
            Box::pin(async { Err(unauthorized()) })
        }
        fn full_status(&self) -> BoxFuture<'_, Result<StatusSnapshot, CoreError>> {
            Box::pin(async {
                Ok(StatusSnapshot { environment: String::new(), machine_count: 0, service_count: 0 })
            })
        }
        fn prepare_local_charm_upload(&self, url: CharmUrl) -> BoxFuture<'_, Result<CharmUrl, CoreError>> {
            Box::pin(async { Ok(url) })
        }
        fn update_uploaded_charm(
            &self,
            _url: &CharmUrl,
            _storage_url: String,
            _sha256: String,
        ) -> BoxFuture<'_, Result<(), CoreError>> {
            Box::pin(async { Ok(()) })
        }
        fn record_agent_presence(&self, _tag: &Tag) -> BoxFuture<'_, Result<(), CoreError>> {
            Box::pin(async { Ok(()) })
        }
        fn ping(&self) -> BoxFuture<'_, Result<(), CoreError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn basic_header(user: &str, pass: &str) -> String {
        let raw = format!("{user}:{pass}");
        let mut out = String::new();
        let bytes = raw.as_bytes();
        for chunk in bytes.chunks(3) {
            let b0 = chunk[0] as u32;
            let b1 = *chunk.get(1).unwrap_or(&0) as u32;
            let b2 = *chunk.get(2).unwrap_or(&0) as u32;
            let n = (b0 << 16) | (b1 << 8) | b2;
            let chars = [
                ALPHABET[(n >> 18 & 0x3f) as usize],
                ALPHABET[(n >> 12 & 0x3f) as usize],
                ALPHABET[(n >> 6 & 0x3f) as usize],
                ALPHABET[(n & 0x3f) as usize],
            ];
            match chunk.len() {
                1 => out.push_str(&format!("{}{}==", chars[0] as char, chars[1] as char)),
                2 => out.push_str(&format!("{}{}{}=", chars[0] as char, chars[1] as char, chars[2] as char)),
                _ => chars.iter().for_each(|c| out.push(*c as char)),
            }
        }
        format!("Basic {out}")
    }

    #[tokio::test]
    async fn accepts_a_valid_human_user() {
        let state: Arc<dyn StateStore> = Arc::new(FixedStore);
        let header = basic_header("user-admin", "secret");
        let authenticator = require_human_user(&state, Some(&header)).await.unwrap();
        assert!(authenticator.tag().is_user());
    }

    #[tokio::test]
    async fn rejects_agent_tags_even_with_correct_password() {
        struct AgentStore;
        impl StateStore for AgentStore {
            fn check_credentials(
                &self,
                _credential: &Credential,
            ) -> BoxFuture<'_, Result<Arc<dyn Authenticator>, CoreError>> {
                Box::pin(async {
                    Ok(Arc::new(fleet_core::auth::AgentAuthenticator::machine(Tag::Machine(0), vec![]))
                        as Arc<dyn Authenticator>)
                })
            }
            fn api_host_ports(&self) -> BoxFuture<'_, Result<Vec<HostPort>, CoreError>> {
                Box::pin(async { Ok(Vec::new()) })
            }
            fn promote_machine_credential(&self, _tag: &Tag) -> BoxFuture<'_, Result<(), CoreError>> {
                Box::pin(async { Ok(()) })
            }
            fn entity_life(&self, _tag: &Tag) -> BoxFuture<'_, Result<Life, CoreError>> {
                Box::pin(async { Ok(Life::Alive) })
            }
            fn can_access(&self, _requester: &Tag, _target: &Tag) -> BoxFuture<'_, Result<bool, CoreError>> {
                Box::pin(async { Ok(true) })
            }
            fn watch_life(
                &self,
                _tag: &Tag,
            ) -> BoxFuture<'_, Result<(Life, fleet_core::future::BoxStream<'static, Life>), CoreError>> {
                Box::pin(async { Err(unauthorized()) })
            }
            fn full_status(&self) -> BoxFuture<'_, Result<StatusSnapshot, CoreError>> {
                Box::pin(async {
                    Ok(StatusSnapshot { environment: String::new(), machine_count: 0, service_count: 0 })
                })
            }
            fn prepare_local_charm_upload(&self, url: CharmUrl) -> BoxFuture<'_, Result<CharmUrl, CoreError>> {
                Box::pin(async { Ok(url) })
            }
            fn update_uploaded_charm(
                &self,
                _url: &CharmUrl,
                _storage_url: String,
                _sha256: String,
            ) -> BoxFuture<'_, Result<(), CoreError>> {
                Box::pin(async { Ok(()) })
            }
            fn record_agent_presence(&self, _tag: &Tag) -> BoxFuture<'_, Result<(), CoreError>> {
                Box::pin(async { Ok(()) })
            }
            fn ping(&self) -> BoxFuture<'_, Result<(), CoreError>> {
                Box::pin(async { Ok(()) })
            }
        }
        let state: Arc<dyn StateStore> = Arc::new(AgentStore);
        let header = basic_header("machine-0", "secret");
        let err = require_human_user(&state, Some(&header)).await.unwrap_err();
        assert_eq!(err.code(), codes::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let state: Arc<dyn StateStore> = Arc::new(FixedStore);
        let err = require_human_user(&state, None).await.unwrap_err();
        assert_eq!(err.code(), codes::UNAUTHORIZED);
    }
}
