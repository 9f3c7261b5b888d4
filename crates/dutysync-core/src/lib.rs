pub mod error;
pub mod db;
pub mod config;
pub mod model;
pub mod classify;
pub mod schedule;
pub mod remote;
pub mod identity;
pub mod files;
pub mod ingestion;
pub mod composer;
pub mod gateway;
pub mod sweeper;
pub mod audit;
pub mod cycle;
