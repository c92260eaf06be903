//! Method dispatch: lookup, overload resolution and invocation.
//!
//! - **Three-Tier Caching**:
//!   1. Inline cache (per call site): skips lookup and resolution
//!   2. Lookup cache (per type+name): skips the MRO walk
//!   3. Full MRO traversal: populates the lookup cache
//!
//! - **Pipeline**:
//!   ```text
//!   load_method -> check_visibility -> OverloadResolver::resolve -> call_method
//!   ```

pub mod call_method;
pub mod load_method;
pub mod method_cache;
pub mod overload_resolution;

pub use call_method::{CallArgs, ResolvedCall, call_method};
pub use load_method::{CallerContext, LoadedMethod, ReceiverKey, Stamps, check_visibility, load_method, stamps_current};
pub use method_cache::{CachedLookup, MethodCache};
pub use overload_resolution::{
    ArgConversion, ConversionPlan, DeclarationOrder, OverloadPolicy, OverloadResolver, ResolutionFailure,
    ScoredCandidate, Selection,
};
