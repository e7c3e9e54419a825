//! CABAC probability states and bit-cost model
//!
//! RDOQ never runs the arithmetic coder. It prices bins with the same
//! probability states the coder would use, looked up in static per-state
//! cost tables, and never adapts those states while doing so.
//!
//! # Components
//!
//! - **Context Models**: 6-bit probability state plus most probable symbol
//! - **Bit Costs**: fractional cost (1/256 bit) of coding an MPS or LPS per state
//! - **Context Snapshot**: the frozen set of all coefficient-coding contexts
//! - **Bin Sinks**: the seam between binarization and whoever consumes the bins

/// Fractional bits per bit (costs are expressed in 1/256 bit)
pub const FRAC_BITS_SCALE: u32 = 256;

/// Cost of one bypass (equiprobable) bin
pub const BYPASS_BITS: u32 = FRAC_BITS_SCALE;

/// CABAC context state
///
/// H.265-style probability model: `state` is the LPS probability index
/// (0 = equiprobable, 62 = most skewed) and `mps` the most probable symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextModel {
    /// Probability state index (0-62)
    state: u8,
    /// Most probable symbol (0 or 1)
    mps: u8,
}

impl ContextModel {
    /// Create a new context model with given state and MPS
    pub fn new(state: u8, mps: u8) -> Self {
        Self {
            state: state.min(62),
            mps: mps & 1,
        }
    }

    /// Equiprobable context
    pub const fn equiprobable() -> Self {
        Self { state: 0, mps: 0 }
    }

    /// Initialize context from an 8-bit init value and the slice QP
    pub fn init(init_value: u8, qp: u8) -> Self {
        // preCtxState = Clip3(1, 126, ((m * Clip3(0, 51, QP)) >> 4) + n)
        let m = ((init_value >> 4) as i32) * 5 - 45;
        let n = (((init_value & 15) as i32) << 3) - 16;

        let qp_clamped = qp.min(51) as i32;
        let pre_ctx_state = (((m * qp_clamped) >> 4) + n).clamp(1, 126);

        if pre_ctx_state <= 63 {
            Self {
                state: (63 - pre_ctx_state) as u8,
                mps: 0,
            }
        } else {
            Self {
                state: (pre_ctx_state - 64) as u8,
                mps: 1,
            }
        }
    }

    /// Get the MPS (Most Probable Symbol) value
    #[inline]
    pub fn mps(&self) -> u8 {
        self.mps
    }

    /// Get the LPS (Least Probable Symbol) value
    #[inline]
    pub fn lps(&self) -> u8 {
        1 - self.mps
    }

    /// Get the probability state index (0-62)
    #[inline]
    pub fn p_state_idx(&self) -> u8 {
        self.state
    }

    /// Estimated cost of coding `bin` with this context, in 1/256 bit
    #[inline]
    pub fn bits(&self, bin: u8) -> u32 {
        if bin == self.mps {
            ENTROPY_BITS_MPS[self.state as usize] as u32
        } else {
            ENTROPY_BITS_LPS[self.state as usize] as u32
        }
    }

    /// Adapt the model after coding `bin`
    pub fn update(&mut self, bin: u8) {
        if bin == self.mps {
            self.update_mps();
        } else {
            self.update_lps();
        }
    }

    /// Update context after coding MPS
    pub fn update_mps(&mut self) {
        self.state = NEXT_STATE_MPS[self.state as usize];
    }

    /// Update context after coding LPS
    pub fn update_lps(&mut self) {
        if self.state == 0 {
            self.mps = 1 - self.mps;
        }
        self.state = NEXT_STATE_LPS[self.state as usize];
    }
}

impl Default for ContextModel {
    fn default() -> Self {
        Self::equiprobable()
    }
}

/// State transition table for MPS (Most Probable Symbol)
const NEXT_STATE_MPS: [u8; 64] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
    17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32,
    33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48,
    49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 62, 63,
];

/// State transition table for LPS (Least Probable Symbol)
const NEXT_STATE_LPS: [u8; 64] = [
    0, 0, 1, 2, 2, 4, 4, 5, 6, 7, 8, 9, 9, 11, 11, 12,
    13, 13, 15, 15, 16, 16, 18, 18, 19, 19, 21, 21, 22, 22, 23, 24,
    24, 25, 26, 26, 27, 27, 28, 29, 29, 30, 30, 30, 31, 32, 32, 33,
    33, 33, 34, 34, 35, 35, 35, 36, 36, 36, 37, 37, 37, 38, 38, 63,
];

/// Cost of coding the MPS in each state, in 1/256 bit: `-log2(1 - p_lps) * 256`
const ENTROPY_BITS_MPS: [u16; 64] = [
    256, 238, 221, 206, 192, 180, 168, 157, 148, 139, 130, 122, 115, 108, 102, 96,
    90, 85, 80, 76, 72, 68, 64, 60, 57, 54, 51, 48, 46, 43, 41, 39,
    37, 35, 33, 31, 29, 28, 26, 25, 24, 22, 21, 20, 19, 18, 17, 16,
    15, 15, 14, 13, 12, 12, 11, 11, 10, 10, 9, 9, 8, 8, 7, 7,
];

/// Cost of coding the LPS in each state, in 1/256 bit: `-log2(p_lps) * 256`
const ENTROPY_BITS_LPS: [u16; 64] = [
    256, 275, 294, 314, 333, 352, 371, 391, 410, 429, 448, 468, 487, 506, 525, 545,
    564, 583, 602, 622, 641, 660, 679, 699, 718, 737, 756, 776, 795, 814, 833, 853,
    872, 891, 910, 930, 949, 968, 987, 1007, 1026, 1045, 1064, 1084, 1103, 1122, 1141, 1161,
    1180, 1199, 1218, 1238, 1257, 1276, 1295, 1315, 1334, 1353, 1372, 1392, 1411, 1430, 1449, 1488,
];

// ─────────────────────────────────────────────────────────────────────────────
// Context layout
// ─────────────────────────────────────────────────────────────────────────────

/// Level contexts per component: `[rank 0..5][region 0..3][bin class 0..2]`
pub const NUM_LEVEL_CTX: usize = 30;
/// Run contexts per component: `[cg0 0..2][abs-sum bucket 0..4][bin class 0..2]`
pub const NUM_RUN_CTX: usize = 16;
/// Last-position-in-CG contexts per component: `[is last CG][cg0][axis][bin 0..3]`
pub const NUM_LAST_POS_CTX: usize = 24;
/// Last-CG contexts per component: `[diagonal][axis][bin 0..3]`
pub const NUM_LAST_CG_CTX: usize = 12;
/// CG significance contexts per component: `[cg0]`
pub const NUM_SIG_CG_CTX: usize = 2;

/// Contexts per colour component
pub const CTX_PER_COMPONENT: usize =
    NUM_LEVEL_CTX + NUM_RUN_CTX + NUM_LAST_POS_CTX + NUM_LAST_CG_CTX + NUM_SIG_CG_CTX;

/// Total number of coefficient-coding contexts (luma + chroma)
pub const NUM_CTX: usize = 2 * CTX_PER_COMPONENT;

/// Syntax element family a context belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CtxFamily {
    /// Coefficient magnitude bins
    Level,
    /// Zero-run bins
    Run,
    /// Last position inside a CG
    LastPos,
    /// Position of the last CG in the block
    LastCg,
    /// "CG has a nonzero coefficient" flag
    SigCg,
}

impl CtxFamily {
    const fn base(self) -> usize {
        match self {
            CtxFamily::Level => 0,
            CtxFamily::Run => NUM_LEVEL_CTX,
            CtxFamily::LastPos => NUM_LEVEL_CTX + NUM_RUN_CTX,
            CtxFamily::LastCg => NUM_LEVEL_CTX + NUM_RUN_CTX + NUM_LAST_POS_CTX,
            CtxFamily::SigCg => {
                NUM_LEVEL_CTX + NUM_RUN_CTX + NUM_LAST_POS_CTX + NUM_LAST_CG_CTX
            }
        }
    }

    /// Number of contexts in this family for one component
    pub const fn len(self) -> usize {
        match self {
            CtxFamily::Level => NUM_LEVEL_CTX,
            CtxFamily::Run => NUM_RUN_CTX,
            CtxFamily::LastPos => NUM_LAST_POS_CTX,
            CtxFamily::LastCg => NUM_LAST_CG_CTX,
            CtxFamily::SigCg => NUM_SIG_CG_CTX,
        }
    }

    fn init_values(self) -> &'static [u8] {
        match self {
            CtxFamily::Level => &LEVEL_INIT,
            CtxFamily::Run => &RUN_INIT,
            CtxFamily::LastPos => &LAST_POS_INIT,
            CtxFamily::LastCg => &LAST_CG_INIT,
            CtxFamily::SigCg => &SIG_CG_INIT,
        }
    }
}

const ALL_FAMILIES: [CtxFamily; 5] = [
    CtxFamily::Level,
    CtxFamily::Run,
    CtxFamily::LastPos,
    CtxFamily::LastCg,
    CtxFamily::SigCg,
];

const LEVEL_INIT: [u8; NUM_LEVEL_CTX] = [
    140, 139, 126, 138, 111, 137, //
    125, 139, 111, 124, 110, 123, //
    124, 154, 110, 139, 109, 138, //
    124, 154, 125, 154, 108, 153, //
    154, 154, 154, 154, 152, 153,
];

const RUN_INIT: [u8; NUM_RUN_CTX] = [
    139, 154, 125, 139, 111, 125, 110, 124, //
    154, 154, 139, 154, 125, 139, 124, 139,
];

const LAST_POS_INIT: [u8; NUM_LAST_POS_CTX] = [
    110, 125, 140, 110, 125, 140, //
    111, 126, 154, 111, 126, 154, //
    125, 139, 154, 125, 139, 154, //
    126, 140, 154, 126, 140, 154,
];

const LAST_CG_INIT: [u8; NUM_LAST_CG_CTX] = [
    125, 140, 154, 125, 140, 154, //
    124, 139, 154, 124, 139, 154,
];

const SIG_CG_INIT: [u8; NUM_SIG_CG_CTX] = [91, 121];

/// Index of one context inside a [`ContextSnapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CtxId(u16);

impl CtxId {
    /// Resolve `(family, component, index)` to a flat context index
    #[inline]
    pub fn new(family: CtxFamily, is_luma: bool, idx: usize) -> Self {
        debug_assert!(
            idx < family.len(),
            "{:?} context index {} out of range",
            family,
            idx
        );
        let component = if is_luma { 0 } else { CTX_PER_COMPONENT };
        Self((component + family.base() + idx) as u16)
    }

    /// Flat index
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Frozen set of coefficient-coding probability states
///
/// RDOQ takes this by shared reference and only reads it; the entropy coder
/// owns it and adapts it through [`ContextTrainer`] (or its own coder) after
/// the levels are final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    models: [ContextModel; NUM_CTX],
}

impl ContextSnapshot {
    /// Initialize every context for the given slice QP
    pub fn new(qp: u8) -> Self {
        let mut models = [ContextModel::equiprobable(); NUM_CTX];
        for is_luma in [true, false] {
            for family in ALL_FAMILIES {
                for (idx, &init_value) in family.init_values().iter().enumerate() {
                    let id = CtxId::new(family, is_luma, idx);
                    models[id.index()] = ContextModel::init(init_value, qp);
                }
            }
        }
        Self { models }
    }

    /// Snapshot with every context equiprobable (one bit per bin)
    pub fn equiprobable() -> Self {
        Self {
            models: [ContextModel::equiprobable(); NUM_CTX],
        }
    }

    /// Get a context model
    #[inline]
    pub fn model(&self, id: CtxId) -> &ContextModel {
        &self.models[id.index()]
    }

    /// Get a mutable context model
    #[inline]
    pub fn model_mut(&mut self, id: CtxId) -> &mut ContextModel {
        &mut self.models[id.index()]
    }

    /// Estimated cost of coding `bin` in context `id`, in 1/256 bit
    #[inline]
    pub fn bits(&self, id: CtxId, bin: u8) -> u32 {
        self.models[id.index()].bits(bin)
    }
}

impl Default for ContextSnapshot {
    fn default() -> Self {
        Self::equiprobable()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bin sinks
// ─────────────────────────────────────────────────────────────────────────────

/// Consumer of binarized syntax elements
///
/// The binarizers in [`crate::syntax`] emit bins into a sink; a cost counter
/// prices them, an arithmetic coder would code them.
pub trait BinSink {
    /// Context-coded bin
    fn encode_bin(&mut self, ctx: CtxId, bin: u8);

    /// Bypass (equiprobable) bin
    fn encode_bypass(&mut self, bin: u8);

    /// `count` bypass bins holding `value`, most significant first
    fn encode_bypass_bins(&mut self, value: u32, count: u32) {
        for i in (0..count).rev() {
            self.encode_bypass(((value >> i) & 1) as u8);
        }
    }
}

/// Sink that sums the estimated cost of every bin without adapting anything
#[derive(Debug, Clone, Copy)]
pub struct BitCounter<'a> {
    snapshot: &'a ContextSnapshot,
    bits: u32,
}

impl<'a> BitCounter<'a> {
    /// Create a counter over a frozen snapshot
    pub fn new(snapshot: &'a ContextSnapshot) -> Self {
        Self { snapshot, bits: 0 }
    }

    /// Accumulated cost in 1/256 bit
    #[inline]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Reset the accumulated cost
    pub fn reset(&mut self) {
        self.bits = 0;
    }
}

impl BinSink for BitCounter<'_> {
    #[inline]
    fn encode_bin(&mut self, ctx: CtxId, bin: u8) {
        self.bits += self.snapshot.bits(ctx, bin);
    }

    #[inline]
    fn encode_bypass(&mut self, _bin: u8) {
        self.bits += BYPASS_BITS;
    }
}

/// Sink that counts bins and adapts the snapshot as the coder would
///
/// Used by the encoder to carry statistics forward once a block's levels are
/// final, and by tests to produce skewed snapshots.
#[derive(Debug)]
pub struct ContextTrainer<'a> {
    snapshot: &'a mut ContextSnapshot,
    bits: u32,
    bins: usize,
}

impl<'a> ContextTrainer<'a> {
    /// Create a trainer over a mutable snapshot
    pub fn new(snapshot: &'a mut ContextSnapshot) -> Self {
        Self {
            snapshot,
            bits: 0,
            bins: 0,
        }
    }

    /// Cost of the bins seen so far, priced before each adaptation
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of bins seen so far (context-coded and bypass)
    pub fn bins(&self) -> usize {
        self.bins
    }
}

impl BinSink for ContextTrainer<'_> {
    fn encode_bin(&mut self, ctx: CtxId, bin: u8) {
        let model = self.snapshot.model_mut(ctx);
        self.bits += model.bits(bin);
        model.update(bin);
        self.bins += 1;
    }

    fn encode_bypass(&mut self, _bin: u8) {
        self.bits += BYPASS_BITS;
        self.bins += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_model_init() {
        let ctx = ContextModel::init(154, 26);
        // m = 0, n = 64 -> preCtxState 64 -> state 0, MPS 1
        assert_eq!(ctx.p_state_idx(), 0);
        assert_eq!(ctx.mps(), 1);
    }

    #[test]
    fn test_context_model_mps_lps() {
        let ctx = ContextModel::new(10, 0);
        assert_eq!(ctx.mps(), 0);
        assert_eq!(ctx.lps(), 1);

        let ctx = ContextModel::new(10, 1);
        assert_eq!(ctx.mps(), 1);
        assert_eq!(ctx.lps(), 0);
    }

    #[test]
    fn test_context_update() {
        let mut ctx = ContextModel::new(0, 0);
        ctx.update_mps();
        assert_eq!(ctx.p_state_idx(), 1);

        let mut ctx = ContextModel::new(10, 0);
        ctx.update_lps();
        assert!(ctx.p_state_idx() < 10);
        assert_eq!(ctx.mps(), 0);
    }

    #[test]
    fn test_lps_at_state_zero_flips_mps() {
        let mut ctx = ContextModel::new(0, 1);
        ctx.update(0);
        assert_eq!(ctx.mps(), 0);
        assert_eq!(ctx.p_state_idx(), 0);
    }

    #[test]
    fn test_context_state_transitions() {
        for state in 0..63 {
            assert!(NEXT_STATE_MPS[state] <= 62);
            assert!(NEXT_STATE_LPS[state] <= 62);
        }
    }

    #[test]
    fn test_context_initialization_qp_range() {
        for qp in 0..80 {
            let ctx = ContextModel::init(154, qp);
            assert!(ctx.p_state_idx() <= 62);
        }
    }

    #[test]
    fn test_bit_costs_monotonic() {
        for state in 1..64 {
            assert!(ENTROPY_BITS_MPS[state] <= ENTROPY_BITS_MPS[state - 1]);
            assert!(ENTROPY_BITS_LPS[state] >= ENTROPY_BITS_LPS[state - 1]);
        }
        let ctx = ContextModel::equiprobable();
        assert_eq!(ctx.bits(0), BYPASS_BITS);
        assert_eq!(ctx.bits(1), BYPASS_BITS);
    }

    #[test]
    fn test_ctx_id_layout() {
        let first_luma = CtxId::new(CtxFamily::Level, true, 0);
        let last_luma = CtxId::new(CtxFamily::SigCg, true, NUM_SIG_CG_CTX - 1);
        let first_chroma = CtxId::new(CtxFamily::Level, false, 0);
        let last_chroma = CtxId::new(CtxFamily::SigCg, false, NUM_SIG_CG_CTX - 1);

        assert_eq!(first_luma.index(), 0);
        assert_eq!(last_luma.index(), CTX_PER_COMPONENT - 1);
        assert_eq!(first_chroma.index(), CTX_PER_COMPONENT);
        assert_eq!(last_chroma.index(), NUM_CTX - 1);
    }

    #[test]
    fn test_snapshot_init_covers_every_family() {
        for family in ALL_FAMILIES {
            assert_eq!(family.init_values().len(), family.len());
        }
        let snapshot = ContextSnapshot::new(32);
        assert_ne!(snapshot, ContextSnapshot::equiprobable());
    }

    #[test]
    fn test_bit_counter_does_not_adapt() {
        let snapshot = ContextSnapshot::new(32);
        let before = snapshot.clone();
        let id = CtxId::new(CtxFamily::Run, true, 3);

        let mut counter = BitCounter::new(&snapshot);
        for _ in 0..100 {
            counter.encode_bin(id, 1);
        }
        counter.encode_bypass_bins(0b101, 3);

        assert_eq!(counter.bits(), 100 * snapshot.bits(id, 1) + 3 * BYPASS_BITS);
        assert_eq!(snapshot, before);
    }

    #[test]
    fn test_trainer_adapts_towards_observed_symbol() {
        let mut snapshot = ContextSnapshot::equiprobable();
        let id = CtxId::new(CtxFamily::SigCg, false, 1);
        {
            let mut trainer = ContextTrainer::new(&mut snapshot);
            for _ in 0..20 {
                trainer.encode_bin(id, 1);
            }
            assert_eq!(trainer.bins(), 20);
        }
        assert_eq!(snapshot.model(id).mps(), 1);
        assert!(snapshot.bits(id, 1) < BYPASS_BITS);
        assert!(snapshot.bits(id, 0) > BYPASS_BITS);
    }
}
