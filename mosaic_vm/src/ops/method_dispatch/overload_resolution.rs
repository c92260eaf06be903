//! Overload resolution: pick one native overload for a concrete call.
//!
//! # Algorithm
//!
//! 1. Drop overloads whose arity does not accept the effective argument
//!    count (an options bag counts as one trailing positional).
//! 2. Drop overloads whose block requirement the call cannot satisfy.
//! 3. Score every explicit parameter against the argument's runtime type:
//!
//! | strategy          | exact type | converter registered | otherwise |
//! |-------------------|-----------:|---------------------:|----------:|
//! | `ExactOnly`       | 0          | reject               | reject    |
//! | `ImplicitConvert` | 0          | 1                    | reject    |
//! | `AcceptAny`       | 2          | 2                    | 2         |
//!
//!    An options bag goes to the overload's options-like slot when it has
//!    one, skipping any omitted optionals before it, and scores 0 there.
//!    Otherwise it is scored as one more trailing positional.
//! 4. Hand the survivors to the [`OverloadPolicy`]. The default
//!    [`DeclarationOrder`] picks the lowest total and breaks ties by the order
//!    the overloads were registered in.
//!
//! Resolution reads nothing but the method entry, the call shape and the
//! converter table, so the same inputs always select the same overload.

use crate::call_shape::CallShape;
use crate::config::BlockPolicy;
use mosaic_core::ModuleId;
use mosaic_runtime::{
    BlockRequirement, ConversionStrategy, Converter, ConverterRegistry, ExplicitParam, MethodEntry, NativeOverload,
};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Score of an `ImplicitConvert` parameter that needs its converter.
pub const CONVERT_SCORE: u32 = 1;

/// Score of an `AcceptAny` parameter.
pub const ACCEPT_ANY_SCORE: u32 = 2;

// =============================================================================
// Conversion Plan
// =============================================================================

/// What to do with one caller argument before the native sees it.
#[derive(Debug, Clone)]
pub enum ArgConversion {
    /// Already the expected type.
    Identity,
    /// Run a registered converter.
    Convert(Converter),
    /// `AcceptAny`: hand over untouched.
    Passthrough,
}

/// Per-argument steps in effective order (positionals, then the options
/// bag), plus where the bag lands and what happens to the block.
#[derive(Debug, Clone, Default)]
pub struct ConversionPlan {
    steps: SmallVec<[ArgConversion; 4]>,
    options_index: Option<usize>,
    passes_block: bool,
}

impl ConversionPlan {
    #[inline]
    pub fn steps(&self) -> &[ArgConversion] {
        &self.steps
    }

    /// Argument index the options bag is handed over at. Omitted optionals
    /// between the last positional and this index read as nil.
    #[inline]
    pub fn options_index(&self) -> Option<usize> {
        self.options_index
    }

    /// Whether the caller's block reaches the native.
    #[inline]
    pub fn passes_block(&self) -> bool {
        self.passes_block
    }

    /// Number of arguments that go through a converter.
    pub fn conversions(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, ArgConversion::Convert(_)))
            .count()
    }
}

// =============================================================================
// Policy Hook
// =============================================================================

/// An overload that survived filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoredCandidate {
    /// Position in the entry's overload list (declaration order).
    pub index: usize,
    /// Sum of parameter scores; lower is better.
    pub score: u32,
}

/// Chooses among scored survivors.
///
/// Candidates arrive in declaration order. Return the position of the winner
/// within `candidates`, or `None` to reject them all.
pub trait OverloadPolicy: Send + Sync + fmt::Debug {
    fn select(&self, candidates: &[ScoredCandidate]) -> Option<usize>;
}

/// Lowest score wins; the earliest registered overload wins a tie.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclarationOrder;

impl OverloadPolicy for DeclarationOrder {
    fn select(&self, candidates: &[ScoredCandidate]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| (c.score, c.index))
            .map(|(position, _)| position)
    }
}

// =============================================================================
// Resolution Result
// =============================================================================

/// The chosen overload and how to feed it.
#[derive(Debug, Clone)]
pub struct Selection {
    pub index: usize,
    pub overload: Arc<NativeOverload>,
    pub score: u32,
    pub plan: ConversionPlan,
}

/// Why no overload was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionFailure {
    /// Every overload rejected the argument count.
    ArgumentCount,
    /// At least one overload accepted the count and shape but not the types.
    NoApplicable,
    /// Matching overloads all need a block and none was passed.
    BlockRequired,
    /// Strict block policy: matching overloads never take a block.
    UnexpectedBlock,
}

// =============================================================================
// Resolver
// =============================================================================

/// Stateless overload selector configured with a policy.
#[derive(Debug, Clone)]
pub struct OverloadResolver {
    policy: Arc<dyn OverloadPolicy>,
    block_policy: BlockPolicy,
}

impl OverloadResolver {
    pub fn new(block_policy: BlockPolicy) -> Self {
        Self::with_policy(Arc::new(DeclarationOrder), block_policy)
    }

    pub fn with_policy(policy: Arc<dyn OverloadPolicy>, block_policy: BlockPolicy) -> Self {
        Self { policy, block_policy }
    }

    #[inline]
    pub fn block_policy(&self) -> BlockPolicy {
        self.block_policy
    }

    /// Select an overload of `entry` for a call of `shape`.
    pub fn resolve(
        &self,
        entry: &MethodEntry,
        shape: &CallShape,
        converters: &ConverterRegistry,
    ) -> Result<Selection, ResolutionFailure> {
        let count = shape.effective_count();
        let mut type_rejected = false;
        let mut block_missing = false;
        let mut unexpected_block = false;

        let mut candidates: SmallVec<[ScoredCandidate; 4]> = SmallVec::new();
        let mut plans: SmallVec<[ConversionPlan; 4]> = SmallVec::new();

        for (index, overload) in entry.overloads().iter().enumerate() {
            if !overload.accepts_arity(count) {
                continue;
            }
            match (overload.block(), shape.has_block()) {
                (BlockRequirement::Required, false) => {
                    block_missing = true;
                    continue;
                }
                (BlockRequirement::Never, true) if self.block_policy == BlockPolicy::Strict => {
                    unexpected_block = true;
                    continue;
                }
                _ => {}
            }
            match score(overload, shape, converters) {
                Some((score, plan)) => {
                    candidates.push(ScoredCandidate { index, score });
                    plans.push(plan);
                }
                None => type_rejected = true,
            }
        }

        let chosen = self
            .policy
            .select(&candidates)
            .filter(|&position| position < candidates.len());

        let Some(position) = chosen else {
            return Err(if type_rejected || !candidates.is_empty() {
                ResolutionFailure::NoApplicable
            } else if block_missing {
                ResolutionFailure::BlockRequired
            } else if unexpected_block {
                ResolutionFailure::UnexpectedBlock
            } else {
                ResolutionFailure::ArgumentCount
            });
        };

        let ScoredCandidate { index, score } = candidates[position];
        let plan = plans.swap_remove(position);
        debug!(
            method = %entry.name(),
            %shape,
            overload = index,
            score,
            survivors = candidates.len(),
            "selected overload"
        );
        Ok(Selection {
            index,
            overload: entry.overloads()[index].clone(),
            score,
            plan,
        })
    }
}

impl Default for OverloadResolver {
    fn default() -> Self {
        Self::new(BlockPolicy::default())
    }
}

/// Score one arity- and block-compatible overload. `None` disqualifies it.
fn score(overload: &NativeOverload, shape: &CallShape, converters: &ConverterRegistry) -> Option<(u32, ConversionPlan)> {
    let mut total = 0;
    let mut steps = SmallVec::new();

    for (position, &actual) in shape.arg_types().iter().enumerate() {
        let (cost, step) = score_param(overload.param_for_arg(position)?, actual, converters)?;
        total += cost;
        steps.push(step);
    }

    let mut options_index = None;
    if let Some(actual) = shape.options_type() {
        match overload.options_slot() {
            // Arity already guarantees the positionals end at or before the slot.
            Some(slot) if slot >= shape.positional() => {
                steps.push(ArgConversion::Identity);
                options_index = Some(slot);
            }
            _ => {
                let position = shape.positional();
                let (cost, step) = score_param(overload.param_for_arg(position)?, actual, converters)?;
                total += cost;
                steps.push(step);
                options_index = Some(position);
            }
        }
    }

    Some((
        total,
        ConversionPlan {
            steps,
            options_index,
            passes_block: shape.has_block() && overload.block() != BlockRequirement::Never,
        },
    ))
}

/// Cost and conversion of passing an `actual`-typed argument to `param`.
fn score_param(param: &ExplicitParam, actual: ModuleId, converters: &ConverterRegistry) -> Option<(u32, ArgConversion)> {
    match param.strategy {
        ConversionStrategy::ExactOnly if actual == param.expected => Some((0, ArgConversion::Identity)),
        ConversionStrategy::ExactOnly => None,
        ConversionStrategy::ImplicitConvert if actual == param.expected => Some((0, ArgConversion::Identity)),
        ConversionStrategy::ImplicitConvert => {
            let converter = converters.get(actual, param.expected)?;
            Some((CONVERT_SCORE, ArgConversion::Convert(converter)))
        }
        ConversionStrategy::AcceptAny => Some((ACCEPT_ANY_SCORE, ArgConversion::Passthrough)),
    }
}

// =============================================================================
// Tests
// =============================================================================
