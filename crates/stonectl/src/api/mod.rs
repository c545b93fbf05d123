//! API route handlers

pub mod daemons;
pub mod error;
pub mod hosts;
pub mod osds;
pub mod services;
pub mod system;

use stonectl_api::requests::{
    AddDaemonRequest, AddHostRequest, ApplyRequest, DaemonActionRequest, RemoveDaemonsRequest,
    RemoveOsdsRequest, StopRemoveOsdsRequest,
};
use stonectl_api::responses::{HealthResponse, MessagesResponse, ServiceDescription};
use stonectl_api::{DaemonDescription, HealthCheck, HostSpec, OrchestratorEvent, OsdRemoval};
use utoipa::OpenApi;

pub use error::{ApiError, AppError};

#[derive(OpenApi)]
#[openapi(
    info(title = "stonectl", description = "Daemon-fleet reconciliation API"),
    paths(
        system::health,
        system::status,
        system::health_checks,
        system::events,
        system::reconcile,
        hosts::list_hosts,
        hosts::add_host,
        hosts::remove_host,
        hosts::add_label,
        hosts::remove_label,
        hosts::enter_maintenance,
        hosts::exit_maintenance,
        hosts::get_facts,
        services::apply,
        services::describe_services,
        services::remove_service,
        daemons::list_daemons,
        daemons::add_daemon,
        daemons::remove_daemons,
        daemons::schedule_action,
        daemons::cancel_action,
        osds::removal_status,
        osds::remove_osds,
        osds::stop_removal,
    ),
    components(schemas(
        ApiError,
        HealthResponse,
        MessagesResponse,
        ServiceDescription,
        DaemonDescription,
        HealthCheck,
        HostSpec,
        OrchestratorEvent,
        OsdRemoval,
        AddHostRequest,
        ApplyRequest,
        AddDaemonRequest,
        RemoveDaemonsRequest,
        DaemonActionRequest,
        RemoveOsdsRequest,
        StopRemoveOsdsRequest,
        hosts::FactsResponse,
        system::ReconcileResponse,
        system::StatusResponse,
    )),
    tags(
        (name = "system", description = "Liveness, health checks and events"),
        (name = "hosts", description = "Host inventory"),
        (name = "services", description = "Service specs"),
        (name = "daemons", description = "Daemon lifecycle"),
        (name = "osds", description = "OSD removal queue"),
    )
)]
pub struct ApiDoc;
