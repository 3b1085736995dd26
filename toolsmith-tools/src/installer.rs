//! Environment-gated installation of packages required by new capabilities.
//!
//! Installation only ever happens inside an isolated, per-project environment.
//! Every outcome, including refusals and failures, is returned as an
//! [`InstallOutcome`] whose `Display` form is fed back to the model.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

/// Failure reported by a [`PackageEnvironment`] query or command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct EnvironmentError {
    reason: String,
}

impl EnvironmentError {
    /// Creates an error from the supplied diagnostic.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns the diagnostic text.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Package-management operations of the environment capabilities run in.
#[async_trait]
pub trait PackageEnvironment: Send + Sync {
    /// Returns `true` when running inside an isolated environment rather than
    /// the system-wide one.
    async fn is_isolated(&self) -> Result<bool, EnvironmentError>;

    /// Returns `true` when the package manager itself is available.
    async fn has_package_manager(&self) -> Result<bool, EnvironmentError>;

    /// Attempts to install the package manager.
    async fn bootstrap_package_manager(&self) -> Result<(), EnvironmentError>;

    /// Returns `true` when `dependency` can already be imported.
    async fn is_installed(&self, dependency: &str) -> Result<bool, EnvironmentError>;

    /// Installs the requirement (`name` or `name==version`).
    async fn install(&self, requirement: &str) -> Result<(), EnvironmentError>;
}

/// Result of a dependency installation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The request was malformed and never reached the package manager.
    Rejected {
        /// Why the request was rejected.
        reason: String,
    },
    /// The process is not running inside an isolated environment.
    NotIsolated,
    /// The environment could not be inspected at all.
    EnvironmentUnavailable {
        /// Interpreter diagnostic.
        reason: String,
    },
    /// The package manager is missing and could not be bootstrapped.
    PackageManagerUnavailable {
        /// Bootstrap diagnostic.
        reason: String,
    },
    /// The dependency is already importable.
    AlreadyInstalled {
        /// Dependency name as requested.
        dependency: String,
    },
    /// The requirement was installed.
    Installed {
        /// Requirement passed to the package manager.
        requirement: String,
    },
    /// The package manager reported a failure.
    Failed {
        /// Requirement passed to the package manager.
        requirement: String,
        /// Diagnostic emitted by the package manager.
        diagnostic: String,
    },
}

impl InstallOutcome {
    /// Returns `true` when the dependency is available after the request.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::AlreadyInstalled { .. } | Self::Installed { .. })
    }
}

impl fmt::Display for InstallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { reason } => write!(f, "Error: invalid dependency request: {reason}"),
            Self::NotIsolated => f.write_str("Error: not running inside a virtual environment."),
            Self::EnvironmentUnavailable { reason } => {
                write!(f, "Error: environment unavailable: {reason}")
            }
            Self::PackageManagerUnavailable { .. } => f.write_str("Error: pip is not available."),
            Self::AlreadyInstalled { dependency } => write!(f, "{dependency} already installed."),
            Self::Installed { requirement } => write!(f, "Installed {requirement}"),
            Self::Failed { diagnostic, .. } => write!(f, "Installation failed: {diagnostic}"),
        }
    }
}

/// Installs dependencies into a [`PackageEnvironment`].
#[derive(Clone)]
pub struct DependencyInstaller {
    environment: Arc<dyn PackageEnvironment>,
}

impl fmt::Debug for DependencyInstaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyInstaller").finish_non_exhaustive()
    }
}

impl DependencyInstaller {
    /// Creates an installer for the supplied environment.
    #[must_use]
    pub fn new(environment: Arc<dyn PackageEnvironment>) -> Self {
        Self { environment }
    }

    /// Installs `dependency`, pinned to `version` when supplied.
    ///
    /// Refuses outside an isolated environment, bootstraps a missing package
    /// manager once, and short-circuits when the dependency is already
    /// importable. Never fails: every outcome is described by the returned
    /// value.
    pub async fn install(&self, dependency: &str, version: Option<&str>) -> InstallOutcome {
        let dependency = dependency.trim();
        let version = version.map(str::trim).filter(|v| !v.is_empty());
        if let Err(reason) = validate_request(dependency, version) {
            warn!(dependency, reason = %reason, "dependency request rejected");
            return InstallOutcome::Rejected { reason };
        }

        match self.environment.is_isolated().await {
            Ok(true) => {}
            Ok(false) => {
                warn!(dependency, "refusing to install outside an isolated environment");
                return InstallOutcome::NotIsolated;
            }
            Err(err) => {
                return InstallOutcome::EnvironmentUnavailable {
                    reason: err.to_string(),
                };
            }
        }

        if let Err(outcome) = self.ensure_package_manager().await {
            return outcome;
        }

        match self.environment.is_installed(dependency).await {
            Ok(true) => {
                info!(dependency, "dependency already installed");
                return InstallOutcome::AlreadyInstalled {
                    dependency: dependency.to_owned(),
                };
            }
            Ok(false) => {}
            Err(err) => {
                return InstallOutcome::EnvironmentUnavailable {
                    reason: err.to_string(),
                };
            }
        }

        let requirement = match version {
            Some(version) => format!("{dependency}=={version}"),
            None => dependency.to_owned(),
        };

        info!(requirement = %requirement, "installing dependency");
        match self.environment.install(&requirement).await {
            Ok(()) => InstallOutcome::Installed { requirement },
            Err(err) => {
                warn!(requirement = %requirement, error = %err, "dependency installation failed");
                InstallOutcome::Failed {
                    requirement,
                    diagnostic: err.to_string(),
                }
            }
        }
    }

    async fn ensure_package_manager(&self) -> Result<(), InstallOutcome> {
        match self.environment.has_package_manager().await {
            Ok(true) => Ok(()),
            Ok(false) => {
                info!("package manager missing, bootstrapping");
                self.environment
                    .bootstrap_package_manager()
                    .await
                    .map_err(|err| {
                        warn!(error = %err, "package manager bootstrap failed");
                        InstallOutcome::PackageManagerUnavailable {
                            reason: err.to_string(),
                        }
                    })
            }
            Err(err) => Err(InstallOutcome::EnvironmentUnavailable {
                reason: err.to_string(),
            }),
        }
    }
}

fn validate_request(dependency: &str, version: Option<&str>) -> Result<(), String> {
    if dependency.is_empty() {
        return Err("dependency name cannot be empty".into());
    }
    if dependency.starts_with('-') {
        return Err(format!("`{dependency}` is not a package name"));
    }
    if dependency.chars().any(char::is_whitespace) {
        return Err(format!("`{dependency}` contains whitespace"));
    }
    if let Some(version) = version {
        if version.chars().any(char::is_whitespace) {
            return Err(format!("version `{version}` contains whitespace"));
        }
    }
    Ok(())
}
