// ABOUTME: End-to-end broker scenarios: a real worker on an ephemeral port,
// driven by the synchronous client against local TCP, UDP and HTTP peers

#[path = "broker_scenarios/fixtures.rs"]
pub mod fixtures;

#[path = "broker_scenarios/sessions.rs"]
mod sessions;

#[path = "broker_scenarios/http_reads.rs"]
mod http_reads;

#[path = "broker_scenarios/admin.rs"]
mod admin;
