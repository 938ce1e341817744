#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::checked_conversions,
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enums,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::flat_map_option,
    clippy::fn_params_excessive_bools,
    clippy::from_iter_instead_of_collect,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::indexing_slicing,
    clippy::inefficient_to_string,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_same_arms,
    clippy::match_wild_err_arm,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::mut_mut,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::needless_for_each,
    clippy::option_option,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::single_match_else,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    unexpected_cfgs
)]
#![allow(clippy::unused_self, clippy::single_match_else)]

pub mod child;
mod config;
mod control;
mod envelope;
mod error;
mod events;
mod executor;
mod failure;
mod job;
mod launcher;
mod matcher;
mod registry;
mod stats;
mod status;
mod storage;
mod storage_builder;
mod storage_internal;
mod storage_keys;
mod worker;


pub use crate::config::{Config, Isolation, QueueSelection};
pub use crate::control::{ControlEvent, ControlHandle};
pub use crate::envelope::{JobEnvelope, JobId, ProcessingInfo};
pub use crate::error::RusqueError;
pub use crate::events::{Event, EventBus, Flow, HookPayload};
pub use crate::failure::FailureRecord;
pub use crate::job::{BoxedJob, Job, JobError};
pub use crate::launcher::run;
pub use crate::matcher::JobMatcher;
pub use crate::registry::{JobFactory, JobRegistry, job_factory};
pub use crate::stats::{GlobalStats, QueueDepth, WorkSummary};
pub use crate::status::{JobStatus, StatusKind};
pub use crate::storage::Storage;
pub use crate::storage_builder::StorageBuilder;
pub use crate::worker::WorkerId;
