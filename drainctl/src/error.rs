use nodedrain::drain::DrainError;
use nodedrain::telemetry::TelemetryConfigError;
use snafu::Snafu;
use std::path::PathBuf;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate-wide error type.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unable to create client: '{}'", source))]
    ClientCreate { source: kube::Error },

    #[snafu(display("Unable to read kubeconfig '{}': '{}'", path.display(), source))]
    ReadKubeconfig {
        path: PathBuf,
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("Unable to load kubeconfig '{}': '{}'", path.display(), source))]
    LoadKubeconfig {
        path: PathBuf,
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("Unable to drain Node: '{}'", source))]
    Drain { source: DrainError },

    #[snafu(display("Unable to cordon Node: '{}'", source))]
    Cordon { source: DrainError },

    #[snafu(display("Unable to uncordon Node: '{}'", source))]
    Uncordon { source: DrainError },

    #[snafu(display("Error configuring telemetry: '{}'", source))]
    Telemetry { source: TelemetryConfigError },
}
