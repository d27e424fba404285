//! Walking a chain of wrapped coin views.
//!
//! A node typically runs one or more caches over a single durable backend.
//! [`CoinViewStack`] unwraps [`CoinView::inner`] from the top layer down to
//! the bottom one and lets collaborators enumerate the layers or reach a
//! layer of a given concrete type.

use std::sync::Arc;

use crate::traits::CoinView;

/// The layers of a coin view chain, ordered top to bottom.
pub struct CoinViewStack {
    layers: Vec<Arc<dyn CoinView>>,
}

impl CoinViewStack {
    /// Collect the layers below (and including) `top`.
    pub fn new(top: Arc<dyn CoinView>) -> Self {
        let mut layers = vec![Arc::clone(&top)];
        let mut current = top;
        while let Some(inner) = current.inner().cloned() {
            layers.push(Arc::clone(&inner));
            current = inner;
        }
        Self { layers }
    }

    /// All layers, top first.
    pub fn layers(&self) -> &[Arc<dyn CoinView>] {
        &self.layers
    }

    /// Layer names, top first.
    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    pub fn top(&self) -> &Arc<dyn CoinView> {
        &self.layers[0]
    }

    /// The layer that wraps nothing.
    pub fn bottom(&self) -> &Arc<dyn CoinView> {
        &self.layers[self.layers.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Always false: a stack holds at least its top layer.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The first layer, from the top, whose concrete type is `T`.
    pub fn find<T: CoinView>(&self) -> Option<&T> {
        self.layers
            .iter()
            .find_map(|layer| layer.as_any().downcast_ref::<T>())
    }
}

impl std::fmt::Debug for CoinViewStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinViewStack")
            .field("layers", &self.names())
            .finish()
    }
}
