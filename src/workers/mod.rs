pub mod verification_scheduler;
