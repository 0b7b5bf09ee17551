#![warn(missing_docs)]

//! Allocators that capture how a container is built and then rebuild it
//! with every surviving allocation placed in fixed-capacity storage.
//!
//! A build runs the initializer three times. The first rebuild only counts
//! allocations, the second records each one into a script (size, count,
//! owner, nesting level, and whether it was freed before the build ended),
//! and the last replays that script: blocks recorded as surviving come out
//! of one reservation sized for exactly those blocks, the others from the
//! heap. A replay that asks for anything the script did not record fails.
//!
//! ```rust
//! # use script_allocators::{build, hash_map::HashMap, vector::Vector};
//!
//! let init = || {
//!     (1..=9)
//!         .map(|key| (key, (0..key).collect::<Vector<i32>>()))
//!         .collect::<HashMap<i32, Vector<i32>>>()
//! };
//!
//! let built = build(init).unwrap();
//! assert_eq!(built, init());
//! assert_eq!(built.get(&3).unwrap(), &[0, 1, 2]);
//! ```

pub mod alive;
pub mod alloc;
pub mod builder;
pub mod config;
pub mod counting;
pub mod error;
pub mod event;
pub mod fixed_arena;
pub mod hash_map;
pub mod identifier;
pub mod rebind;
pub mod replay;
pub mod script;
pub mod shared_value;
pub mod text;
pub mod transcript;
pub mod vector;

pub use alloc::{Heap, ScriptAlloc};
pub use builder::{build, Builder, Built, Plan};
pub use config::{BlockAlign, BuildConfig};
pub use error::{AllocError, BuildError, ScriptError};
pub use hash_map::HashMap;
pub use rebind::Rebind;
pub use replay::ReplayAlloc;
pub use script::Script;
pub use text::Text;
pub use vector::Vector;
