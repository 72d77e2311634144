use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// A Conjur organization account
#[braid(serde)]
pub struct Account;

/// A login name, such as `bob` or `host/jenkins`
#[braid(serde)]
pub struct Login;

/// An authenticator service identifier, such as the `{service_id}` in `authn-jwt/{service_id}`
#[braid(serde)]
pub struct ServiceId;

/// An API key issued to a user or host
#[braid(serde, debug = "owned", display = "owned")]
pub struct ApiKey;

limited_reveal!(ApiKeyRef: "API KEY", 5);

/// A user password, exchanged once for an [`ApiKey`]
#[braid(serde, debug = "owned", display = "owned")]
pub struct Password;

limited_reveal!(PasswordRef: "PASSWORD", 1);

/// A Conjur access token in verbatim form
///
/// The token must be base64-encoded before it is placed into an
/// `Authorization` header.
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// A JSON web token presented to a JWT authenticator
#[braid(serde, debug = "owned", display = "owned")]
pub struct Jwt;

limited_reveal!(JwtRef: "JWT", 15);

/// A one-time bootstrap credential used to provision a new host
#[braid(serde, debug = "owned", display = "owned")]
pub struct HostFactoryToken;

limited_reveal!(HostFactoryTokenRef: "HOST FACTORY TOKEN", 5);
