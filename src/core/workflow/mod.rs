//! Rule-driven workflows whose task graph grows as rules fire.
//!
//! A [`state::WorkflowState`] starts as a set of pending rules. Each rule is bound to a
//! scope and becomes applicable once the work its dependency expressions select is done;
//! applying it adds steps, further rules or whole sub-workflows through a
//! [`view::WorkflowViewMut`]. Controllers drive that cycle and hand ready nodes to an
//! [`backend::ExecutionBackend`].

pub mod backend;
pub mod controller;
pub mod definition;
pub mod graph;
pub mod handler;
pub mod handlers;
pub mod index;
pub mod query;
pub mod reset;
pub mod rule;
pub mod scope;
pub mod state;
pub mod steering;
pub mod store;
pub mod task;
pub mod validate;
pub mod view;
