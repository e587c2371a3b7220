//! Work-group decomposition of the convolution grid.

use denoise_utils::{TilingSettings, WorkDim};

use super::rows::{BLOCK_OH, BLOCK_OW};

/// Knobs of the work-group heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingConfig {
    /// Pad an all-odd grid so the item count is even (paired execution units).
    pub eu_fusion: bool,
    /// Upper bound on work-items per group.
    pub max_group_items: usize,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            eu_fusion: true,
            max_group_items: 16,
        }
    }
}

impl From<&TilingSettings> for TilingConfig {
    fn from(settings: &TilingSettings) -> Self {
        Self {
            eu_fusion: settings.eu_fusion,
            max_group_items: settings.max_group_items.max(1),
        }
    }
}

/// Global item grid and per-group item grid of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSize {
    pub global: WorkDim<3>,
    pub local: WorkDim<3>,
}

impl WorkSize {
    /// Number of work-groups along each axis.
    pub fn groups(&self) -> WorkDim<3> {
        self.global / self.local
    }
}

/// Work-items needed to cover `channel_blocks x height x width` outputs.
pub fn conv_global_items(channel_blocks: usize, height: usize, width: usize) -> WorkDim<3> {
    WorkDim::new([
        channel_blocks,
        height.div_ceil(BLOCK_OH),
        width.div_ceil(BLOCK_OW),
    ])
}

/// Choose the local grid for `global` items.
///
/// Groups start as wide as possible across channel blocks, then grow by
/// doubling along the spatial axis whose local extent (in output pixels) is
/// smaller, falling back to the other axis, while every axis still divides
/// the global grid and the group stays within `max_group_items`.
pub fn size_work_groups(global: WorkDim<3>, config: &TilingConfig) -> WorkSize {
    let mut global = global;
    if config.eu_fusion && global.dims().iter().all(|d| d % 2 == 1) {
        global[2] += 1;
    }

    let max_items = config.max_group_items.max(1);
    let mut local = WorkDim::new([largest_divisor_up_to(global[0], max_items), 1, 1]);

    while local.product() * 2 <= max_items {
        let preferred = if local[1] * BLOCK_OH < local[2] * BLOCK_OW {
            1
        } else {
            2
        };
        let fallback = 3 - preferred;

        if global[preferred] % (local[preferred] * 2) == 0 {
            local[preferred] *= 2;
        } else if global[fallback] % (local[fallback] * 2) == 0 {
            local[fallback] *= 2;
        } else {
            break;
        }
    }

    WorkSize { global, local }
}

fn largest_divisor_up_to(value: usize, limit: usize) -> usize {
    (1..=limit.min(value))
        .rev()
        .find(|candidate| value % candidate == 0)
        .unwrap_or(1)
}
