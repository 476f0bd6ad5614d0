//! Verification of signed mini-app init data.
//!
//! The platform hands every mini-app launch a URL-encoded query string (the
//! "init data") with the user record, an `auth_date` and a `hash`. The hash is
//! an HMAC-SHA256 over the remaining fields, keyed by a secret derived from
//! the bot token:
//!
//! ```text
//! secret_key       = HMAC_SHA256(key = "WebAppData", msg = bot_token)
//! data_check_string = sorted("key=value" for every field except hash).join("\n")
//! hash             = hex(HMAC_SHA256(key = secret_key, msg = data_check_string))
//! ```
//!
//! [`InitDataVerifier::validate`] recomputes the hash and checks freshness.
//! [`parse_user`] extracts the user record without checking anything, so it
//! must only be called on init data that already passed validation.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AuthError, AuthResult};
use crate::types::PlatformUser;

type HmacSha256 = Hmac<Sha256>;

/// Key used to derive the per-bot secret.
pub const WEB_APP_DATA_KEY: &[u8] = b"WebAppData";

/// Default freshness window: 24 hours.
pub const DEFAULT_MAX_AGE_SECONDS: i64 = 86400;

const HASH_FIELD: &str = "hash";
const AUTH_DATE_FIELD: &str = "auth_date";
const USER_FIELD: &str = "user";

/// Init data that passed signature and freshness checks.
#[derive(Debug, Clone)]
pub struct InitData {
    /// Decoded fields in their original order, without `hash`
    fields: Vec<(String, String)>,
    auth_date: DateTime<Utc>,
}

impl InitData {
    /// First value of `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        field(&self.fields, key)
    }

    /// When the platform signed this init data.
    pub fn auth_date(&self) -> DateTime<Utc> {
        self.auth_date
    }

    /// Decoded fields, excluding `hash`.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// The platform user this init data was issued for.
    pub fn user(&self) -> AuthResult<PlatformUser> {
        user_from_fields(&self.fields)
    }
}

/// Validates init data against one bot's secret.
///
/// The secret key is derived once from the bot token at construction.
#[derive(Clone)]
pub struct InitDataVerifier {
    secret_key: [u8; 32],
}

impl InitDataVerifier {
    /// Create a verifier for the bot identified by `bot_token`.
    pub fn new(bot_token: &str) -> AuthResult<Self> {
        Ok(Self {
            secret_key: derive_secret_key(bot_token)?,
        })
    }

    /// Validate init data signed at most `max_age` ago.
    pub fn validate(&self, raw: &str, max_age: Duration) -> AuthResult<InitData> {
        self.validate_at(raw, max_age, Utc::now())
    }

    /// Validate init data against an explicit clock.
    ///
    /// The window is inclusive: init data exactly `max_age` old is accepted.
    pub fn validate_at(
        &self,
        raw: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> AuthResult<InitData> {
        let mut fields = parse_query(raw)?;

        let hash = field(&fields, HASH_FIELD)
            .map(str::to_string)
            .ok_or(AuthError::MissingSignature)?;
        fields.retain(|(key, _)| key != HASH_FIELD);

        let expected = hex::encode(hmac_sha256(
            &self.secret_key,
            data_check_string(&fields).as_bytes(),
        )?);

        if !bool::from(expected.as_bytes().ct_eq(hash.as_bytes())) {
            return Err(AuthError::SignatureMismatch);
        }

        let auth_date_secs: i64 = field(&fields, AUTH_DATE_FIELD)
            .and_then(|value| value.parse().ok())
            .ok_or(AuthError::MalformedTimestamp)?;
        let auth_date =
            DateTime::from_timestamp(auth_date_secs, 0).ok_or(AuthError::MalformedTimestamp)?;

        let age_seconds = now.timestamp() - auth_date_secs;
        if age_seconds > max_age.num_seconds() {
            return Err(AuthError::StaleAssertion {
                age_seconds,
                max_age_seconds: max_age.num_seconds(),
            });
        }

        Ok(InitData { fields, auth_date })
    }
}

impl std::fmt::Debug for InitDataVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitDataVerifier").finish_non_exhaustive()
    }
}

/// Extract the platform user from init data without validating it.
pub fn parse_user(raw: &str) -> AuthResult<PlatformUser> {
    user_from_fields(&parse_query(raw)?)
}

/// Derive the HMAC key for a bot: `HMAC_SHA256("WebAppData", bot_token)`.
pub fn derive_secret_key(bot_token: &str) -> AuthResult<[u8; 32]> {
    hmac_sha256(WEB_APP_DATA_KEY, bot_token.as_bytes())
}

/// Build the canonical string the platform signs.
///
/// Fields are sorted by key (then value, for repeated keys) and joined with
/// newlines. `hash` must already be removed.
pub fn data_check_string(fields: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = fields.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    sorted
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sign `fields` as the platform would and return the encoded init data.
///
/// Used for local testing and tooling; production init data always comes
/// from the platform.
pub fn sign_init_data(fields: &[(&str, &str)], bot_token: &str) -> AuthResult<String> {
    let owned: Vec<(String, String)> = fields
        .iter()
        .filter(|(key, _)| *key != HASH_FIELD)
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();

    let secret_key = derive_secret_key(bot_token)?;
    let hash = hex::encode(hmac_sha256(
        &secret_key,
        data_check_string(&owned).as_bytes(),
    )?);

    let mut encoded: Vec<String> = owned
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect();
    encoded.push(format!("{}={}", HASH_FIELD, hash));

    Ok(encoded.join("&"))
}

/// Decode a `application/x-www-form-urlencoded` string into ordered pairs.
fn parse_query(raw: &str) -> AuthResult<Vec<(String, String)>> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Ok((decode_component(key)?, decode_component(value)?))
        })
        .collect()
}

fn decode_component(component: &str) -> AuthResult<String> {
    let bytes = component.as_bytes();
    for (at, _) in component.match_indices('%') {
        let escape = bytes.get(at + 1..at + 3);
        if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
            return Err(AuthError::MalformedAssertion(format!(
                "invalid percent escape at byte {}",
                at
            )));
        }
    }

    let spaced = component.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| AuthError::MalformedAssertion(e.to_string()))
}

fn field<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, value)| value.as_str())
}

fn user_from_fields(fields: &[(String, String)]) -> AuthResult<PlatformUser> {
    let raw = field(fields, USER_FIELD).ok_or(AuthError::MissingUser)?;
    serde_json::from_str(raw).map_err(|e| AuthError::MalformedUser(e.to_string()))
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> AuthResult<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| AuthError::Internal("HMAC key rejected".to_string()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT_TOKEN: &str = "7000000000:TEST-bot-token";

    /// Captured from a real launch, re-signed with `BOT_TOKEN`.
    const REFERENCE_INIT_DATA: &str = "query_id=AAHdF6IQAAAAAN0XohDhrOrc&user=%7B%22id%22%3A279058397%2C%22first_name%22%3A%22Vladislav%22%2C%22last_name%22%3A%22Kibenko%22%2C%22username%22%3A%22vdkfrost%22%2C%22language_code%22%3A%22ru%22%7D&auth_date=1662771648&hash=f37437de2d171b18f6f327d7031a931557698d015b9b12198f1b94a7544a57b1";
    const REFERENCE_AUTH_DATE: i64 = 1662771648;

    fn verifier() -> InitDataVerifier {
        InitDataVerifier::new(BOT_TOKEN).unwrap()
    }

    fn signed_at(auth_date: i64) -> String {
        let auth_date = auth_date.to_string();
        sign_init_data(
            &[
                ("query_id", "AAH-test"),
                ("user", r#"{"id":12345,"first_name":"Ada","username":"ada"}"#),
                ("auth_date", auth_date.as_str()),
            ],
            BOT_TOKEN,
        )
        .unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_reference_vector() {
        let now = at(REFERENCE_AUTH_DATE + 10);
        let data = verifier()
            .validate_at(REFERENCE_INIT_DATA, Duration::seconds(300), now)
            .unwrap();

        assert_eq!(data.auth_date().timestamp(), REFERENCE_AUTH_DATE);
        assert_eq!(data.get("query_id"), Some("AAHdF6IQAAAAAN0XohDhrOrc"));
        assert!(data.get("hash").is_none());

        let user = data.user().unwrap();
        assert_eq!(user.id, 279058397);
        assert_eq!(user.username, "vdkfrost");
        assert_eq!(user.language_code.as_deref(), Some("ru"));
    }

    #[test]
    fn test_fresh_init_data_validates() {
        let now = Utc::now();
        let raw = signed_at(now.timestamp());
        let data = verifier().validate_at(&raw, Duration::seconds(300), now).unwrap();
        assert_eq!(data.user().unwrap().id, 12345);
    }

    #[test]
    fn test_any_hash_mutation_is_rejected() {
        let now = Utc::now();
        let raw = signed_at(now.timestamp());
        let (body, hash) = raw.rsplit_once("&hash=").unwrap();
        assert_eq!(hash.len(), 64);

        for i in 0..hash.len() {
            let mut mutated: Vec<char> = hash.chars().collect();
            mutated[i] = if mutated[i] == '0' { '1' } else { '0' };
            let mutated: String = mutated.into_iter().collect();
            let tampered = format!("{}&hash={}", body, mutated);

            let result = verifier().validate_at(&tampered, Duration::seconds(300), now);
            assert!(
                matches!(result, Err(AuthError::SignatureMismatch)),
                "mutation at {} accepted",
                i
            );
        }
    }

    #[test]
    fn test_uppercase_hash_is_rejected() {
        let now = Utc::now();
        let raw = signed_at(now.timestamp());
        let (body, hash) = raw.rsplit_once("&hash=").unwrap();
        let tampered = format!("{}&hash={}", body, hash.to_uppercase());
        let result = verifier().validate_at(&tampered, Duration::seconds(300), now);
        assert!(matches!(result, Err(AuthError::SignatureMismatch)));
    }

    #[test]
    fn test_tampered_field_is_rejected() {
        let now = Utc::now();
        let raw = signed_at(now.timestamp()).replace("AAH-test", "AAH-evil");
        let result = verifier().validate_at(&raw, Duration::seconds(300), now);
        assert!(matches!(result, Err(AuthError::SignatureMismatch)));
    }

    #[test]
    fn test_wrong_bot_token_is_rejected() {
        let now = Utc::now();
        let raw = signed_at(now.timestamp());
        let other = InitDataVerifier::new("7000000001:OTHER").unwrap();
        let result = other.validate_at(&raw, Duration::seconds(300), now);
        assert!(matches!(result, Err(AuthError::SignatureMismatch)));
    }

    #[test]
    fn test_missing_hash() {
        let result = verifier().validate("auth_date=1&user=%7B%7D", Duration::seconds(300));
        assert!(matches!(result, Err(AuthError::MissingSignature)));

        let result = verifier().validate("", Duration::seconds(300));
        assert!(matches!(result, Err(AuthError::MissingSignature)));
    }

    #[test]
    fn test_missing_or_malformed_auth_date() {
        let now = Utc::now();
        let max_age = Duration::seconds(300);

        let raw = sign_init_data(&[("user", r#"{"id":1}"#)], BOT_TOKEN).unwrap();
        let result = verifier().validate_at(&raw, max_age, now);
        assert!(matches!(result, Err(AuthError::MalformedTimestamp)));

        let raw = sign_init_data(&[("auth_date", "yesterday")], BOT_TOKEN).unwrap();
        let result = verifier().validate_at(&raw, max_age, now);
        assert!(matches!(result, Err(AuthError::MalformedTimestamp)));
    }

    #[test]
    fn test_freshness_boundary_is_inclusive() {
        let now = Utc::now();
        let max_age = Duration::seconds(300);

        let raw = signed_at(now.timestamp() - 300);
        assert!(verifier().validate_at(&raw, max_age, now).is_ok());

        let raw = signed_at(now.timestamp() - 301);
        let result = verifier().validate_at(&raw, max_age, now);
        match result {
            Err(AuthError::StaleAssertion {
                age_seconds,
                max_age_seconds,
            }) => {
                assert_eq!(age_seconds, 301);
                assert_eq!(max_age_seconds, 300);
            }
            other => panic!("expected StaleAssertion, got {:?}", other),
        }
    }

    #[test]
    fn test_max_age_is_a_parameter() {
        let now = Utc::now();
        let raw = signed_at(now.timestamp() - 3600);

        assert!(verifier().validate_at(&raw, Duration::seconds(300), now).is_err());
        assert!(verifier()
            .validate_at(&raw, Duration::seconds(DEFAULT_MAX_AGE_SECONDS), now)
            .is_ok());
    }

    #[test]
    fn test_data_check_string_sorted_by_key() {
        let fields = vec![
            ("user".to_string(), "{}".to_string()),
            ("auth_date".to_string(), "1".to_string()),
            ("chat_type".to_string(), "private".to_string()),
        ];
        assert_eq!(
            data_check_string(&fields),
            "auth_date=1\nchat_type=private\nuser={}"
        );
    }

    #[test]
    fn test_plus_decodes_to_space() {
        let fields = parse_query("a=hello+world&b=%2B1").unwrap();
        assert_eq!(fields[0], ("a".to_string(), "hello world".to_string()));
        assert_eq!(fields[1], ("b".to_string(), "+1".to_string()));
    }

    #[test]
    fn test_invalid_percent_escapes_are_rejected() {
        for raw in ["user=%zz", "a%2=1", "auth_date=1&q=%", "%G1=x"] {
            assert!(
                matches!(parse_query(raw), Err(AuthError::MalformedAssertion(_))),
                "{} accepted",
                raw
            );
        }

        let now = Utc::now();
        let raw = format!("{}&x=%zz", signed_at(now.timestamp()));
        let result = verifier().validate_at(&raw, Duration::seconds(300), now);
        assert!(matches!(result, Err(AuthError::MalformedAssertion(_))));
    }

    #[test]
    fn test_surrounding_whitespace_is_not_stripped() {
        let now = Utc::now();
        let raw = signed_at(now.timestamp());

        for padded in [format!(" {}", raw), format!("{}\n", raw), format!("\t{} ", raw)] {
            let result = verifier().validate_at(&padded, Duration::seconds(300), now);
            assert!(matches!(result, Err(AuthError::SignatureMismatch)));
        }
    }

    #[test]
    fn test_parse_user() {
        let user = parse_user(REFERENCE_INIT_DATA).unwrap();
        assert_eq!(user.id, 279058397);
        assert_eq!(user.first_name, "Vladislav");

        assert!(matches!(parse_user("auth_date=1"), Err(AuthError::MissingUser)));
        assert!(matches!(
            parse_user("user=not-json"),
            Err(AuthError::MalformedUser(_))
        ));
    }
}
