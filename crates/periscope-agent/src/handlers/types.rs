//! Type-system handlers: domains, types, type.

use std::sync::Arc;

use periscope_types::descriptor::TypeDescriptor;
use periscope_types::envelope::Fault;
use periscope_wire::endpoint;
use periscope_wire::messages::{DomainsResponse, TypeRequest, TypesRequest, TypesResponse};

use crate::snapshot::fault_from_runtime;
use crate::{lock, AgentState};

pub fn domains(state: &Arc<AgentState>) -> Result<DomainsResponse, Fault> {
    let rt = lock(&state.runtime);
    Ok(DomainsResponse {
        domain_name: rt.domain_name().to_string(),
        modules: rt.assemblies().to_vec(),
    })
}

pub fn types(state: &Arc<AgentState>, body: &[u8]) -> Result<TypesResponse, Fault> {
    let request: TypesRequest = super::parse(body, endpoint::TYPES)?;
    let rt = lock(&state.runtime);
    let types = rt.types_in(&request.assembly).map_err(fault_from_runtime)?;
    Ok(TypesResponse {
        assembly: request.assembly,
        types,
    })
}

pub fn type_dump(state: &Arc<AgentState>, body: &[u8]) -> Result<TypeDescriptor, Fault> {
    let request: TypeRequest = super::parse(body, endpoint::TYPE)?;
    let rt = lock(&state.runtime);
    rt.describe(&request.full_name, request.assembly.as_deref())
        .map_err(fault_from_runtime)
}
