//! Metric sink workers: Graphite (line protocol) and InfluxDB (HTTP write API).

pub mod graphite;
pub mod influxdb;
