//! Sidecars Orbit knows how to start

use orbit_core::{OrbitError, Result};
use serde::Serialize;

/// A backing service available as a compose profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SidecarSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub port: u16,
}

pub const SIDECAR_CATALOG: &[SidecarSpec] = &[
    SidecarSpec {
        name: "postgres",
        description: "PostgreSQL 15",
        port: 5432,
    },
    SidecarSpec {
        name: "redis",
        description: "Redis 7",
        port: 6379,
    },
    SidecarSpec {
        name: "mysql",
        description: "MySQL 8",
        port: 3306,
    },
    SidecarSpec {
        name: "mongodb",
        description: "MongoDB 7",
        port: 27017,
    },
    SidecarSpec {
        name: "rabbitmq",
        description: "RabbitMQ 3 (+ management UI on 15672)",
        port: 5672,
    },
    SidecarSpec {
        name: "aws",
        description: "LocalStack (S3, SQS, SNS, DynamoDB, Lambda)",
        port: 4566,
    },
];

pub fn lookup(name: &str) -> Option<&'static SidecarSpec> {
    SIDECAR_CATALOG.iter().find(|s| s.name == name)
}

/// Catalog entry for `name`, or [`OrbitError::UnknownSidecar`]
pub fn require(name: &str) -> Result<&'static SidecarSpec> {
    lookup(name).ok_or_else(|| OrbitError::UnknownSidecar {
        name: name.to_string(),
        available: SIDECAR_CATALOG
            .iter()
            .map(|s| s.name)
            .collect::<Vec<_>>()
            .join(", "),
    })
}
