use std::fmt;

/// Typed errors for set construction and thread registration.
///
/// Data-path operations (`add`/`remove`/`contains`) never fail with these:
/// contention is retried internally and callers only see domain booleans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A set needs at least one zone.
    NoZones,
    /// More zones requested than the placement exposes.
    TooManyZones { requested: usize, available: usize },
    /// A handle was requested for a zone the set was not built with.
    BadZone { zone: usize, zones: usize },
    /// Every hazard slot is taken; no more threads can register.
    RegistryFull { max_threads: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoZones => {
                write!(f, "at least one zone is required")
            }
            Error::TooManyZones {
                requested,
                available,
            } => {
                write!(
                    f,
                    "{} zones requested but placement exposes only {}",
                    requested, available
                )
            }
            Error::BadZone { zone, zones } => {
                write!(f, "zone {} out of range (set has {} zones)", zone, zones)
            }
            Error::RegistryFull { max_threads } => {
                write!(
                    f,
                    "hazard registry full ({} thread slots in use)",
                    max_threads
                )
            }
        }
    }
}

impl std::error::Error for Error {}
