//! A small Lisp whose control flow (special forms, quasiquote, `call/cc`,
//! `trap`) runs on an explicit step machine: every nested evaluation is a
//! step returned to a central loop, with pending work kept on a persistent
//! auxiliary stack. Tail calls use no stack, and continuations are cheap
//! snapshots of that stack.
//!
//! ```no_run
//! use lysp::{Config, Machine};
//!
//! let mut m = Machine::new(Config::from_env())?;
//! assert_eq!(m.eval_to_string("`(1 ,(+ 1 1) ,@(list 3 4))")?, "(1 2 3 4)");
//! # Ok::<(), lysp::EvalError>(())
//! ```

pub mod config;
pub mod context;
pub mod continuation;
pub mod env;
pub mod error;
pub mod eval;
pub mod ffi;
pub mod forms;
pub mod globals;
pub mod heap;
pub mod primitives;
pub mod printer;
pub mod quasi;
pub mod reader;
pub mod symbol;
pub mod trap;
pub mod value;

pub use config::Config;
pub use error::{EvalError, EvalResult};
pub use eval::Machine;
pub use printer::SharedBuffer;
pub use value::Value;
