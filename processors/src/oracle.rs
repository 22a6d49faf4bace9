use std::fmt;

///
/// The external LLM interface: a pure `prompt -> text` function. The core does not specify what
/// the text means beyond "structured JSON the calling processor knows how to parse" (§6); the
/// core only specifies the contract and treats the implementation as an opaque collaborator.
///
#[async_trait::async_trait]
pub trait LLMOracle: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}

/// Raised by an `LLMOracle` implementation itself (e.g. a transport failure talking to the
/// backing model). Distinct from a processor's own `ProcessorError::Malformed`, which is raised
/// when the oracle *answered* but its answer didn't parse.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OracleError(pub String);

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oracle error: {}", self.0)
    }
}

impl std::error::Error for OracleError {}
