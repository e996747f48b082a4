//! Return codes and the application error of the `dsreplication` tool.

use std::fmt;
use thiserror::Error;

/// Process exit status of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    /// The operation completed.
    Successful,
    /// Nothing had to be done.
    SuccessfulNop,
    /// A prompt was needed in non-interactive mode.
    NonInteractiveAborted,
    /// Two arguments cannot be used together.
    ConflictingArgs,
    /// Invalid user input.
    ErrorUserData,
    /// A server could not be reached or authenticated.
    ErrorConnecting,
    /// No base DN can be replicated.
    ReplicationCannotBeEnabledOnBaseDn,
    /// No base DN can be unreplicated.
    ReplicationCannotBeDisabledOnBaseDn,
    /// No base DN can be initialized.
    ReplicationCannotBeInitializedOnBaseDn,
    /// A server configuration could not be read.
    ErrorReadingConfiguration,
    /// The administration registry could not be updated.
    ErrorUpdatingAds,
    /// The administration registry could not be read.
    ErrorReadingAds,
    /// A server of the topology could not be read.
    ErrorReadingTopologyCache,
    /// A replication server could not be configured.
    ErrorConfiguringReplicationServer,
    /// The two registries cannot be merged.
    ReplicationAdsMergeNotSupported,
    /// A replication domain could not be configured.
    ErrorEnablingReplicationOnBaseDn,
    /// An initialization task failed.
    ErrorInitializingBaseDnGeneric,
    /// A replication domain could not be removed.
    ErrorDisablingReplicationOnBaseDn,
    /// A reference to a removed replication server could not be dropped.
    ErrorDisablingReplicationRemoveReferenceOnBaseDn,
    /// The source server has no domain ID for a base DN.
    ReplicationIdNotFound,
    /// The initialization kept failing to find its peer.
    InitializingTriesCompleted,
    /// The pre external initialization task failed.
    ErrorLaunchingPreExternalInitialization,
    /// The post external initialization task failed.
    ErrorLaunchingPostExternalInitialization,
    /// A trust store could not be seeded.
    ErrorSeedingTruststore,
    /// The purge historical task failed.
    ErrorLaunchingPurgeHistorical,
    /// No base DN can have its historical purged.
    HistoricalCannotBePurgedOnBaseDn,
    /// The local purge process failed.
    ErrorLocalPurgeHistorical,
    /// The change number could not be reset.
    ErrorResettingChangeNumber,
    /// A task did not finish before its deadline.
    TaskTimedOut,
    /// The user cancelled at a prompt.
    UserCancelled,
}

impl ReturnCode {
    /// The numeric process exit status.
    pub fn code(self) -> u8 {
        match self {
            ReturnCode::Successful | ReturnCode::SuccessfulNop => 0,
            ReturnCode::NonInteractiveAborted => 1,
            ReturnCode::ConflictingArgs => 2,
            ReturnCode::ErrorUserData => 3,
            ReturnCode::ErrorConnecting => 4,
            ReturnCode::ReplicationCannotBeEnabledOnBaseDn => 5,
            ReturnCode::ReplicationCannotBeDisabledOnBaseDn => 6,
            ReturnCode::ReplicationCannotBeInitializedOnBaseDn => 7,
            ReturnCode::ErrorReadingConfiguration => 8,
            ReturnCode::ErrorUpdatingAds => 9,
            ReturnCode::ErrorReadingAds => 10,
            ReturnCode::ErrorReadingTopologyCache => 11,
            ReturnCode::ErrorConfiguringReplicationServer => 12,
            ReturnCode::ReplicationAdsMergeNotSupported => 13,
            ReturnCode::ErrorEnablingReplicationOnBaseDn => 14,
            ReturnCode::ErrorInitializingBaseDnGeneric => 15,
            ReturnCode::ErrorDisablingReplicationOnBaseDn => 16,
            ReturnCode::ErrorDisablingReplicationRemoveReferenceOnBaseDn => 17,
            ReturnCode::ReplicationIdNotFound => 18,
            ReturnCode::InitializingTriesCompleted => 19,
            ReturnCode::ErrorLaunchingPreExternalInitialization => 20,
            ReturnCode::ErrorLaunchingPostExternalInitialization => 21,
            ReturnCode::ErrorSeedingTruststore => 22,
            ReturnCode::ErrorLaunchingPurgeHistorical => 23,
            ReturnCode::HistoricalCannotBePurgedOnBaseDn => 24,
            ReturnCode::ErrorLocalPurgeHistorical => 25,
            ReturnCode::ErrorResettingChangeNumber => 26,
            ReturnCode::TaskTimedOut => 27,
            ReturnCode::UserCancelled => 28,
        }
    }

    /// True for both successful codes.
    pub fn is_success(self) -> bool {
        self.code() == 0
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The single error every operation returns: a message for the user, the
/// low-level cause, and the code callers branch on.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ReplicationCliError {
    /// Exit status this error maps to.
    pub code: ReturnCode,
    /// Message printed to the user.
    pub message: String,
    /// Underlying cause, kept for the log file.
    #[source]
    pub source: Option<BoxError>,
}

impl ReplicationCliError {
    /// An error without an underlying cause.
    pub fn new(code: ReturnCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// An error wrapping a lower-level cause.
    pub fn with_source<E>(code: ReturnCode, message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Message followed by every cause of the chain, for the log file.
    pub fn chain(&self) -> String {
        let mut out = self.message.clone();
        let mut cause: Option<&(dyn std::error::Error + 'static)> =
            self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static));
        while let Some(err) = cause {
            out.push_str(": ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }
}

/// Result alias of the operation layer.
pub type Result<T> = std::result::Result<T, ReplicationCliError>;
