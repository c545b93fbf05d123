//! HTTP router configuration

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::api::{daemons, hosts, osds, services, system};
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let v1 = Router::new()
        // Hosts
        .route("/hosts", get(hosts::list_hosts).post(hosts::add_host))
        .route("/hosts/{name}", delete(hosts::remove_host))
        .route(
            "/hosts/{name}/labels/{label}",
            post(hosts::add_label).delete(hosts::remove_label),
        )
        .route(
            "/hosts/{name}/maintenance",
            post(hosts::enter_maintenance).delete(hosts::exit_maintenance),
        )
        .route("/hosts/{name}/facts", get(hosts::get_facts))
        // Services
        .route("/specs", post(services::apply))
        .route("/services", get(services::describe_services))
        .route("/services/{name}", delete(services::remove_service))
        // Daemons
        .route(
            "/daemons",
            get(daemons::list_daemons)
                .post(daemons::add_daemon)
                .delete(daemons::remove_daemons),
        )
        .route(
            "/daemons/{name}/action",
            post(daemons::schedule_action).delete(daemons::cancel_action),
        )
        // OSDs
        .route(
            "/osds/removal",
            get(osds::removal_status)
                .post(osds::remove_osds)
                .delete(osds::stop_removal),
        )
        // System
        .route("/status", get(system::status))
        .route("/health-checks", get(system::health_checks))
        .route("/events", get(system::events))
        .route("/reconcile", post(system::reconcile))
        .route("/openapi.json", get(system::openapi));

    Router::new()
        .route("/health", get(system::health))
        .nest("/api/v1", v1)
        .with_state(state)
}
