//! FHIR resource access with an issued session.

pub mod client;
pub mod envelope;

pub use client::FhirResourceClient;
pub use envelope::ResourceEnvelope;
