// One JSON document per line in each direction; one request per response.

use crate::array::{Array, ArrayId};
use crate::core::{ArrayError, CoreTimeoutReport, NodeRecord, Registration, Result};
use serde::{Deserialize, Serialize};

use super::EndpointKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum Request {
    Lookup { name: String },
    Coordinator { name: String, call: CoordinatorCall },
    Node { name: String, call: NodeCall },
    Board { name: String, call: BoardCall },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum CoordinatorCall {
    Register(NodeRecord),
    ReportCoreTimeout(CoreTimeoutReport),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum NodeCall {
    Ping,
    Assign { array: Array, role: String },
    StartService,
    Unassign { reason: String },
    ArrayDissolved { array_id: ArrayId, reason: String },
    Terminate { reason: String },
    Snapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum BoardCall {
    Open(Array),
    Close(ArrayId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Reply {
    Unit,
    Bool(bool),
    Kind(EndpointKind),
    Registration(Registration),
    Record(NodeRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Response {
    Ok(Reply),
    Err(ArrayError),
}

impl From<Result<Reply>> for Response {
    fn from(result: Result<Reply>) -> Self {
        match result {
            Ok(reply) => Self::Ok(reply),
            Err(e) => Self::Err(e),
        }
    }
}

impl Response {
    pub(crate) fn into_result(self) -> Result<Reply> {
        match self {
            Self::Ok(reply) => Ok(reply),
            Self::Err(e) => Err(e),
        }
    }
}

pub(crate) fn encode<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub(crate) fn decode<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T> {
    Ok(serde_json::from_str(line.trim_end())?)
}

pub(crate) fn unexpected(reply: Reply) -> ArrayError {
    ArrayError::Protocol(format!("Unexpected reply: {:?}", reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NodeAddress, NodeId};

    #[test]
    fn test_request_is_one_line() {
        let record = NodeRecord::unbound(NodeAddress::new("127.0.0.1", 1181)).with_id(NodeId::new());
        let request = Request::Coordinator {
            name: "coordinator".to_string(),
            call: CoordinatorCall::Register(record.clone()),
        };
        let line = encode(&request).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let decoded: Request = decode(&line).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_remote_error_survives_the_wire() {
        let response = Response::from(Err::<Reply, _>(ArrayError::NotAssigned));
        let line = encode(&response).unwrap();
        let decoded: Response = decode(&line).unwrap();
        assert_eq!(decoded.into_result().unwrap_err(), ArrayError::NotAssigned);
    }

    #[test]
    fn test_garbage_is_protocol_error() {
        let err = decode::<Request>("{not json").unwrap_err();
        assert!(matches!(err, ArrayError::Protocol(_)));
    }
}
