//! Weight-set storage and role bookkeeping.
//!
//! Each role (the gate and every expert) owns an independent, named set of
//! parameter tensors. Base weight sets live in the [`WeightStore`] for the
//! whole run and are mutated only by the outer optimizer; inner-loop
//! adaptation derives new sets from them without ever writing back.

use std::fmt;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// A single parameter tensor (rank 1 or rank 2)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Tensor {
    Matrix(Array2<f64>),
    Vector(Array1<f64>),
}

impl Tensor {
    /// Total number of scalar elements
    pub fn len(&self) -> usize {
        match self {
            Tensor::Matrix(m) => m.len(),
            Tensor::Vector(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero tensor of the same shape
    pub fn zeros_like(&self) -> Tensor {
        match self {
            Tensor::Matrix(m) => Tensor::Matrix(Array2::zeros(m.dim())),
            Tensor::Vector(v) => Tensor::Vector(Array1::zeros(v.len())),
        }
    }

    /// Elementwise map into a new tensor
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Tensor {
        match self {
            Tensor::Matrix(m) => Tensor::Matrix(m.mapv(&f)),
            Tensor::Vector(v) => Tensor::Vector(v.mapv(&f)),
        }
    }

    /// Elementwise combination of two same-shaped tensors
    pub fn zip_with(&self, other: &Tensor, f: impl Fn(f64, f64) -> f64) -> Tensor {
        match (self, other) {
            (Tensor::Matrix(a), Tensor::Matrix(b)) => {
                assert_eq!(a.dim(), b.dim(), "tensor shape mismatch");
                let mut out = a.clone();
                out.zip_mut_with(b, |x, &y| *x = f(*x, y));
                Tensor::Matrix(out)
            }
            (Tensor::Vector(a), Tensor::Vector(b)) => {
                assert_eq!(a.len(), b.len(), "tensor shape mismatch");
                let mut out = a.clone();
                out.zip_mut_with(b, |x, &y| *x = f(*x, y));
                Tensor::Vector(out)
            }
            _ => panic!("tensor rank mismatch"),
        }
    }

    /// Read a scalar by flat (row-major) index
    pub fn get(&self, index: usize) -> f64 {
        match self {
            Tensor::Matrix(m) => {
                let cols = m.ncols();
                m[[index / cols, index % cols]]
            }
            Tensor::Vector(v) => v[index],
        }
    }

    /// Write a scalar by flat (row-major) index
    pub fn set(&mut self, index: usize, value: f64) {
        match self {
            Tensor::Matrix(m) => {
                let cols = m.ncols();
                m[[index / cols, index % cols]] = value;
            }
            Tensor::Vector(v) => v[index] = value,
        }
    }

    /// Borrow as a matrix; panics if this is a vector
    pub fn as_matrix(&self) -> &Array2<f64> {
        match self {
            Tensor::Matrix(m) => m,
            Tensor::Vector(_) => panic!("expected matrix tensor"),
        }
    }

    /// Borrow as a vector; panics if this is a matrix
    pub fn as_vector(&self) -> &Array1<f64> {
        match self {
            Tensor::Vector(v) => v,
            Tensor::Matrix(_) => panic!("expected vector tensor"),
        }
    }
}

/// An ordered mapping from parameter name to tensor.
///
/// Insertion order is preserved so that derived sets (fast weights,
/// gradients) line up positionally with the set they were derived from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightSet {
    entries: Vec<(String, Tensor)>,
}

impl WeightSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Tensor) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    /// Look up a matrix parameter; panics if absent or of the wrong rank
    pub fn matrix(&self, name: &str) -> &Array2<f64> {
        self.get(name)
            .unwrap_or_else(|| panic!("missing parameter {name}"))
            .as_matrix()
    }

    /// Look up a vector parameter; panics if absent or of the wrong rank
    pub fn vector(&self, name: &str) -> &Array1<f64> {
        self.get(name)
            .unwrap_or_else(|| panic!("missing parameter {name}"))
            .as_vector()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of scalar parameters across all tensors
    pub fn num_params(&self) -> usize {
        self.entries.iter().map(|(_, t)| t.len()).sum()
    }

    /// True when both sets hold the same parameter names in the same order
    pub fn same_names(&self, other: &WeightSet) -> bool {
        self.len() == other.len()
            && self
                .names()
                .zip(other.names())
                .all(|(a, b)| a == b)
    }

    /// Derive `self - lr * grads`, matched positionally by name.
    ///
    /// This is how fast weights are produced: a new set, never a mutation.
    pub fn gradient_step(&self, grads: &WeightSet, lr: f64) -> WeightSet {
        assert!(
            self.same_names(grads),
            "gradient set does not match parameter set"
        );
        let mut out = WeightSet::new();
        for ((name, w), (_, g)) in self.entries.iter().zip(grads.entries.iter()) {
            out.insert(name.clone(), w.zip_with(g, |w, g| w - lr * g));
        }
        out
    }

    /// Elementwise sum of two same-named sets
    pub fn add(&self, other: &WeightSet) -> WeightSet {
        assert!(self.same_names(other), "weight set name mismatch");
        let mut out = WeightSet::new();
        for ((name, a), (_, b)) in self.entries.iter().zip(other.entries.iter()) {
            out.insert(name.clone(), a.zip_with(b, |a, b| a + b));
        }
        out
    }

    /// Elementwise scaling
    pub fn scale(&self, factor: f64) -> WeightSet {
        let mut out = WeightSet::new();
        for (name, t) in &self.entries {
            out.insert(name.clone(), t.map(|x| x * factor));
        }
        out
    }
}

/// Identity of one weight-set owner: the gate or a numbered expert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Gate,
    Expert(usize),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Gate => write!(f, "gate"),
            Role::Expert(i) => write!(f, "expert_{i}"),
        }
    }
}

/// Owner of all base weight sets for a run.
///
/// Created once before training. Every role is independently initialized;
/// no two roles share storage even when shapes coincide. Read concurrently
/// by every task during a meta-batch, written exactly once per meta-step by
/// the optimizer after all tasks have finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightStore {
    gate: WeightSet,
    experts: Vec<WeightSet>,
}

impl WeightStore {
    pub fn new(gate: WeightSet, experts: Vec<WeightSet>) -> Self {
        Self { gate, experts }
    }

    pub fn num_experts(&self) -> usize {
        self.experts.len()
    }

    pub fn gate(&self) -> &WeightSet {
        &self.gate
    }

    pub fn expert(&self, index: usize) -> &WeightSet {
        &self.experts[index]
    }

    pub fn role(&self, role: Role) -> &WeightSet {
        match role {
            Role::Gate => &self.gate,
            Role::Expert(i) => &self.experts[i],
        }
    }

    pub fn role_mut(&mut self, role: Role) -> &mut WeightSet {
        match role {
            Role::Gate => &mut self.gate,
            Role::Expert(i) => &mut self.experts[i],
        }
    }

    /// All roles in a fixed order: gate first, then experts by index
    pub fn roles(&self) -> Vec<Role> {
        let mut roles = Vec::with_capacity(1 + self.experts.len());
        roles.push(Role::Gate);
        for i in 0..self.experts.len() {
            roles.push(Role::Expert(i));
        }
        roles
    }

    /// Flat named view over every tensor, e.g. `gate/w1`, `expert_0/b2`.
    ///
    /// External persistence only needs this mapping (or the serde impl).
    pub fn flat(&self) -> Vec<(String, &Tensor)> {
        let mut out = Vec::new();
        for role in self.roles() {
            for (name, tensor) in self.role(role).iter() {
                out.push((format!("{role}/{name}"), tensor));
            }
        }
        out
    }
}

/// Per-role outer gradients for one meta-step.
///
/// `None` means the role had no gradient path into the objective this step
/// (for example the gate under uniform gating); the optimizer must leave
/// such parameters exactly as they were.
#[derive(Debug, Clone, Default)]
pub struct StoreGrads {
    pub gate: Option<WeightSet>,
    pub experts: Vec<Option<WeightSet>>,
}

impl StoreGrads {
    pub fn empty(num_experts: usize) -> Self {
        Self {
            gate: None,
            experts: vec![None; num_experts],
        }
    }

    pub fn role(&self, role: Role) -> Option<&WeightSet> {
        match role {
            Role::Gate => self.gate.as_ref(),
            Role::Expert(i) => self.experts[i].as_ref(),
        }
    }

    /// Sum a gate gradient contribution into the accumulator
    pub fn add_gate(&mut self, grads: WeightSet) {
        self.gate = Some(match self.gate.take() {
            Some(acc) => acc.add(&grads),
            None => grads,
        });
    }

    /// Sum an expert gradient contribution into the accumulator
    pub fn add_expert(&mut self, index: usize, grads: WeightSet) {
        self.experts[index] = Some(match self.experts[index].take() {
            Some(acc) => acc.add(&grads),
            None => grads,
        });
    }

    /// Scale every defined gradient (used to average over the meta-batch)
    pub fn scale(&mut self, factor: f64) {
        if let Some(g) = self.gate.take() {
            self.gate = Some(g.scale(factor));
        }
        for slot in &mut self.experts {
            if let Some(g) = slot.take() {
                *slot = Some(g.scale(factor));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn small_set() -> WeightSet {
        let mut set = WeightSet::new();
        set.insert("w1", Tensor::Matrix(array![[1.0, 2.0], [3.0, 4.0]]));
        set.insert("b1", Tensor::Vector(array![0.5, -0.5]));
        set
    }

    #[test]
    fn test_flat_indexing_round_trip() {
        let mut t = Tensor::Matrix(array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(t.get(2), 3.0);
        t.set(2, 9.0);
        assert_eq!(t.get(2), 9.0);
    }

    fn ones_like(set: &WeightSet) -> WeightSet {
        let mut out = WeightSet::new();
        for (name, t) in set.iter() {
            out.insert(name, t.map(|_| 1.0));
        }
        out
    }

    #[test]
    fn test_gradient_step_is_a_new_set() {
        let base = small_set();
        let grads = ones_like(&base);
        let fast = base.gradient_step(&grads, 0.1);
        assert_eq!(fast.matrix("w1")[[0, 0]], 1.0 - 0.1);
        // base untouched
        assert_eq!(base.matrix("w1")[[0, 0]], 1.0);
    }

    #[test]
    fn test_store_roles_and_flat_names() {
        let store = WeightStore::new(small_set(), vec![small_set(), small_set()]);
        assert_eq!(
            store.roles(),
            vec![Role::Gate, Role::Expert(0), Role::Expert(1)]
        );
        let names: Vec<String> = store.flat().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"gate/w1".to_string()));
        assert!(names.contains(&"expert_1/b1".to_string()));
    }

    #[test]
    fn test_roles_do_not_share_storage() {
        let mut store = WeightStore::new(small_set(), vec![small_set()]);
        if let Some(t) = store.role_mut(Role::Gate).get_mut("w1") {
            t.set(0, 42.0);
        }
        assert_eq!(store.expert(0).matrix("w1")[[0, 0]], 1.0);
    }

    #[test]
    fn test_store_grads_accumulate() {
        let mut grads = StoreGrads::empty(2);
        assert!(grads.role(Role::Gate).is_none());
        grads.add_expert(1, small_set());
        grads.add_expert(1, small_set());
        let summed = grads.role(Role::Expert(1)).unwrap();
        assert_eq!(summed.matrix("w1")[[0, 0]], 2.0);
        assert!(grads.role(Role::Expert(0)).is_none());
    }

    #[test]
    fn test_serde_round_trip() {
        let store = WeightStore::new(small_set(), vec![small_set()]);
        let json = serde_json::to_string(&store).unwrap();
        let restored: WeightStore = serde_json::from_str(&json).unwrap();
        assert_eq!(store, restored);
    }
}
