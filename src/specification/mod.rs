//! Query specifications.
//!
//! A [`Specification`] is a value that carries a predicate plus optional
//! ordering and paging. Stores evaluate it against their rows; callers never
//! depend on how a store actually runs the query.
//!
//! ```ignore
//! let spec = Specification::new(|m: &OutboxMessage| !m.processed)
//!     .order_by(|a, b| a.created_at.cmp(&b.created_at))
//!     .take(10);
//!
//! let rows = spec.apply(all_rows.iter());
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Composable, side-effect free query filter over `T`.
pub struct Specification<T> {
    name: String,
    predicate: Predicate<T>,
    order: Option<Comparator<T>>,
    skip: usize,
    take: Option<usize>,
}

impl<T> Clone for Specification<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            predicate: Arc::clone(&self.predicate),
            order: self.order.clone(),
            skip: self.skip,
            take: self.take,
        }
    }
}

impl<T> fmt::Debug for Specification<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Specification")
            .field("name", &self.name)
            .field("ordered", &self.order.is_some())
            .field("skip", &self.skip)
            .field("take", &self.take)
            .finish()
    }
}

impl<T: 'static> Specification<T> {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            name: "custom".to_string(),
            predicate: Arc::new(predicate),
            order: None,
            skip: 0,
            take: None,
        }
    }

    /// Matches every row.
    pub fn all() -> Self {
        Self::new(|_| true).named("all")
    }

    /// Label used in logs and `Debug` output.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rows matching both predicates.
    ///
    /// Paging comes from `self` only; `other`'s skip and take are dropped.
    /// Ordering comes from `self`, or from `other` when `self` has none.
    pub fn and(self, other: Specification<T>) -> Self {
        let left = self.predicate;
        let right = other.predicate;
        Self {
            name: format!("({} and {})", self.name, other.name),
            predicate: Arc::new(move |item: &T| left(item) && right(item)),
            order: self.order.or(other.order),
            skip: self.skip,
            take: self.take,
        }
    }

    /// Rows matching either predicate. Ordering and paging combine as in
    /// [`Specification::and`].
    pub fn or(self, other: Specification<T>) -> Self {
        let left = self.predicate;
        let right = other.predicate;
        Self {
            name: format!("({} or {})", self.name, other.name),
            predicate: Arc::new(move |item: &T| left(item) || right(item)),
            order: self.order.or(other.order),
            skip: self.skip,
            take: self.take,
        }
    }

    /// Negates the predicate, keeping ordering and paging.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        let inner = self.predicate;
        Self {
            name: format!("not {}", self.name),
            predicate: Arc::new(move |item: &T| !inner(item)),
            order: self.order,
            skip: self.skip,
            take: self.take,
        }
    }

    pub fn order_by<F>(mut self, compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        self.order = Some(Arc::new(compare));
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn take(mut self, n: usize) -> Self {
        self.take = Some(n);
        self
    }

    pub fn limit(&self) -> Option<usize> {
        self.take
    }

    pub fn is_satisfied_by(&self, item: &T) -> bool {
        (self.predicate)(item)
    }

    /// Filter, order, then page the given rows.
    pub fn apply<'a, I>(&self, items: I) -> Vec<T>
    where
        I: IntoIterator<Item = &'a T>,
        T: Clone + 'a,
    {
        let mut matched: Vec<&T> = items
            .into_iter()
            .filter(|item| self.is_satisfied_by(*item))
            .collect();

        if let Some(order) = &self.order {
            // stable sort keeps the store's own order for ties
            matched.sort_by(|a, b| order(*a, *b));
        }

        matched
            .into_iter()
            .skip(self.skip)
            .take(self.take.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}
