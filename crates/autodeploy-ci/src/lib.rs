//! Jenkins adapter for the autodeploy pipeline.
//!
//! [`JenkinsClient`] triggers jobs through the Jenkins REST API, follows the
//! queue item until a build number is assigned and polls the build until it
//! finishes. Build ids are self-describing (see [`BuildRef`]), so one client
//! can serve any number of concurrent runs.

pub mod build_ref;
pub mod jenkins;

pub use build_ref::BuildRef;
pub use jenkins::JenkinsClient;
