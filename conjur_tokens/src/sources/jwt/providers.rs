use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use thiserror::Error;

use crate::Jwt;

/// Where Kubernetes mounts the service account token
pub const K8S_JWT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// An error while obtaining a JWT assertion
#[derive(Debug, Error)]
pub enum JwtProviderError {
    /// Unable to read the token file
    #[error("unable to read JWT from `{}`", path.display())]
    Read {
        /// The file that was read
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
    /// The provider callback failed
    #[error("JWT provider callback failed")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A source of JWT assertions
#[async_trait]
pub trait JwtProvider: fmt::Debug + Send + Sync {
    /// Obtains an assertion, blocking the current thread
    fn jwt_blocking(&self) -> Result<Jwt, JwtProviderError>;

    /// Obtains an assertion asynchronously
    async fn jwt(&self) -> Result<Jwt, JwtProviderError>;
}

/// Always presents the same assertion
#[derive(Clone, Debug)]
pub struct ConstantJwtProvider(Jwt);

impl ConstantJwtProvider {
    /// Constructs a provider for a fixed assertion
    pub fn new(jwt: impl Into<Jwt>) -> Self {
        Self(jwt.into())
    }
}

#[async_trait]
impl JwtProvider for ConstantJwtProvider {
    fn jwt_blocking(&self) -> Result<Jwt, JwtProviderError> {
        Ok(self.0.clone())
    }

    async fn jwt(&self) -> Result<Jwt, JwtProviderError> {
        Ok(self.0.clone())
    }
}

/// Reads the assertion from a file each time one is needed
///
/// Trailing whitespace is trimmed, since mounted token files commonly end in
/// a newline.
#[derive(Clone, Debug)]
pub struct FileJwtProvider {
    path: PathBuf,
}

impl Default for FileJwtProvider {
    fn default() -> Self {
        Self::new(K8S_JWT_PATH)
    }
}

impl FileJwtProvider {
    /// Constructs a provider reading from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file the assertion is read from
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, contents: io::Result<String>) -> Result<Jwt, JwtProviderError> {
        let contents = contents.map_err(|source| JwtProviderError::Read {
            path: self.path.clone(),
            source,
        })?;
        Ok(Jwt::new(contents.trim_end().to_owned()))
    }
}

#[async_trait]
impl JwtProvider for FileJwtProvider {
    fn jwt_blocking(&self) -> Result<Jwt, JwtProviderError> {
        self.parse(std::fs::read_to_string(&self.path))
    }

    async fn jwt(&self) -> Result<Jwt, JwtProviderError> {
        self.parse(tokio::fs::read_to_string(&self.path).await)
    }
}

/// Asks a callback for the assertion
pub struct FnJwtProvider<F> {
    f: F,
}

impl<F> fmt::Debug for FnJwtProvider<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnJwtProvider").finish_non_exhaustive()
    }
}

impl<F, E> FnJwtProvider<F>
where
    F: Fn() -> Result<Jwt, E> + Send + Sync,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    /// Constructs a provider from a callback
    pub fn new(f: F) -> Self {
        Self { f }
    }

    fn call(&self) -> Result<Jwt, JwtProviderError> {
        (self.f)().map_err(|e| JwtProviderError::Callback(e.into()))
    }
}

#[async_trait]
impl<F, E> JwtProvider for FnJwtProvider<F>
where
    F: Fn() -> Result<Jwt, E> + Send + Sync,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn jwt_blocking(&self) -> Result<Jwt, JwtProviderError> {
        self.call()
    }

    async fn jwt(&self) -> Result<Jwt, JwtProviderError> {
        self.call()
    }
}
