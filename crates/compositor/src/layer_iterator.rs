use render_protocol::LayerId;

use crate::layer::LayerTree;

/// One stop of a front-to-back walk over the render-surface layer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerIteratorPosition {
    /// Every layer drawing into `target` has been visited.
    TargetSurface { target: LayerId },
    /// `layer`'s surface is composited into `target`.
    ContributingSurface { layer: LayerId, target: LayerId },
    /// `layer` draws its own content into `target`.
    Itself { layer: LayerId, target: LayerId },
}

impl LayerIteratorPosition {
    pub fn target(&self) -> LayerId {
        match *self {
            LayerIteratorPosition::TargetSurface { target }
            | LayerIteratorPosition::ContributingSurface { target, .. }
            | LayerIteratorPosition::Itself { target, .. } => target,
        }
    }

    pub fn layer(&self) -> LayerId {
        match *self {
            LayerIteratorPosition::TargetSurface { target } => target,
            LayerIteratorPosition::ContributingSurface { layer, .. }
            | LayerIteratorPosition::Itself { layer, .. } => layer,
        }
    }
}

/// Positions front to back.
///
/// Inside a target, layers come front-most first. A contributing surface
/// yields its own contents, then its `TargetSurface` stop, then its
/// `ContributingSurface` stop in the parent target.
pub fn front_to_back(tree: &LayerTree, render_surface_layer_list: &[LayerId]) -> Vec<LayerIteratorPosition> {
    let Some(&root) = render_surface_layer_list.first() else {
        return Vec::new();
    };
    let mut positions = Vec::new();
    let mut stack: Vec<(LayerId, usize)> = vec![(root, layer_list_len(tree, root))];
    while let Some(frame) = stack.last_mut() {
        let target = frame.0;
        if frame.1 == 0 {
            stack.pop();
            positions.push(LayerIteratorPosition::TargetSurface { target });
            if let Some(&(parent_target, _)) = stack.last() {
                positions.push(LayerIteratorPosition::ContributingSurface {
                    layer: target,
                    target: parent_target,
                });
            }
            continue;
        }
        frame.1 -= 1;
        let index = frame.1;
        let layer = layer_list(tree, target)[index];
        if layer != target && tree.get(layer).render_surface().is_some() {
            stack.push((layer, layer_list_len(tree, layer)));
        } else {
            positions.push(LayerIteratorPosition::Itself { layer, target });
        }
    }
    positions
}

fn layer_list(tree: &LayerTree, target: LayerId) -> &[LayerId] {
    tree.get(target)
        .render_surface()
        .map(|surface| surface.layer_list())
        .unwrap_or_else(|| panic!("render target {target} has no render surface"))
}

fn layer_list_len(tree: &LayerTree, target: LayerId) -> usize {
    layer_list(tree, target).len()
}
