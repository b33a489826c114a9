pub mod jobs;
pub mod swarm;
