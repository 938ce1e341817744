mod queue;
mod status;
mod worker;
