//! The data-selector pipeline: filter, sort and paginate rows by their properties
//!
//! Rows are wrapped in [`DataCell`]s whose [`Properties`] are computed once via [`Describe`]. The
//! pipeline is pure and runs on the request task; it sees nothing but properties.
//!
//! 1. Filters conjoin. A filter on an unrecognized property excludes every row. A filter on a
//!    recognized property that a row does not carry is ignored for that row.
//! 2. `total` is the number of rows that survive filtering.
//! 3. Sorting is stable and multi-key. Unrecognized or absent properties compare equal. Without an
//!    explicit sort, rows are ordered by creation time (newest first) and then by name.
//! 4. Pagination clamps the offset to `[0, total]`; a limit of zero returns every remaining row.

use crate::Error;
use std::cmp::Ordering;

mod property;

pub use self::property::{Describe, Properties, Property, Value};

/// A row together with its properties
#[derive(Clone, Debug)]
pub struct DataCell<T> {
    item: T,
    properties: Properties,
}

/// A property as named by a caller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyName {
    Known(Property),
    Unknown(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterBy {
    pub property: PropertyName,
    pub value: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortBy {
    pub property: PropertyName,
    pub direction: Direction,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Paginate {
    pub offset: usize,
    /// Zero means no limit
    pub limit: usize,
}

/// How a list request selects rows
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataSelectQuery {
    pub filter: Vec<FilterBy>,
    pub sort: Vec<SortBy>,
    pub paginate: Paginate,
}

/// Rows that survived filtering, before sorting and pagination
#[derive(Debug)]
pub struct Filtered<T> {
    cells: Vec<DataCell<T>>,
}

/// One page of rows and the number of rows that matched the filters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection<T> {
    pub items: Vec<T>,
    pub total: usize,
}

// === impl DataCell ===

impl<T: Describe> DataCell<T> {
    pub fn new(item: T) -> Self {
        let properties = item.describe();
        Self { item, properties }
    }
}

impl<T> DataCell<T> {
    pub fn item(&self) -> &T {
        &self.item
    }

    pub fn into_item(self) -> T {
        self.item
    }

    pub fn property(&self, name: &PropertyName) -> Option<&Value> {
        match name {
            PropertyName::Known(p) => self.properties.get(*p),
            PropertyName::Unknown(_) => None,
        }
    }
}

// === impl PropertyName ===

impl From<&str> for PropertyName {
    fn from(name: &str) -> Self {
        match Property::from_name(name) {
            Some(p) => Self::Known(p),
            None => Self::Unknown(name.to_string()),
        }
    }
}

// === impl FilterBy ===

impl FilterBy {
    pub fn new(property: impl Into<PropertyName>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
        }
    }

    /// Parses `property=value`
    pub fn parse(s: &str) -> Result<Self, Error> {
        let (p, v) = s
            .split_once('=')
            .ok_or_else(|| Error::BadRequest(format!("invalid filter {s:?}")))?;
        Ok(Self::new(p.trim(), v.trim()))
    }

    fn keeps<T>(&self, cell: &DataCell<T>) -> bool {
        match &self.property {
            PropertyName::Unknown(_) => false,
            PropertyName::Known(p) => match cell.properties.get(*p) {
                Some(value) => value.matches(&self.value),
                None => true,
            },
        }
    }
}

impl From<Property> for PropertyName {
    fn from(p: Property) -> Self {
        Self::Known(p)
    }
}

// === impl SortBy ===

impl SortBy {
    pub fn asc(property: impl Into<PropertyName>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(property: impl Into<PropertyName>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Descending,
        }
    }

    /// Parses `+property`, `-property` or a bare (ascending) `property`
    pub fn parse(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        let sort = match s.strip_prefix('-') {
            Some(p) => Self::desc(p),
            None => Self::asc(s.strip_prefix('+').unwrap_or(s)),
        };
        if matches!(&sort.property, PropertyName::Unknown(p) if p.is_empty()) {
            return Err(Error::BadRequest(format!("invalid sort {s:?}")));
        }
        Ok(sort)
    }

    fn compare<T>(&self, a: &DataCell<T>, b: &DataCell<T>) -> Ordering {
        let ord = match (a.property(&self.property), b.property(&self.property)) {
            (Some(a), Some(b)) => a.compare(b),
            _ => Ordering::Equal,
        };
        match self.direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        }
    }
}

// === impl DataSelectQuery ===

impl Default for DataSelectQuery {
    fn default() -> Self {
        Self {
            filter: Vec::new(),
            sort: Self::default_sort(),
            paginate: Paginate::default(),
        }
    }
}

impl DataSelectQuery {
    /// Newest first, then by name
    pub fn default_sort() -> Vec<SortBy> {
        vec![
            SortBy::desc(Property::CreationTimestamp),
            SortBy::asc(Property::Name),
        ]
    }

    /// Builds a query from raw request parameters
    pub fn from_params<'a>(
        filters: impl IntoIterator<Item = &'a str>,
        sorts: impl IntoIterator<Item = &'a str>,
        paginate: Paginate,
    ) -> Result<Self, Error> {
        let filter = filters
            .into_iter()
            .filter(|f| !f.is_empty())
            .map(FilterBy::parse)
            .collect::<Result<Vec<_>, _>>()?;
        let mut sort = sorts
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(SortBy::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if sort.is_empty() {
            sort = Self::default_sort();
        }
        Ok(Self {
            filter,
            sort,
            paginate,
        })
    }

    /// Returns a copy of this query with an additional filter
    pub fn with_filter(mut self, property: Property, value: impl Into<String>) -> Self {
        self.filter.push(FilterBy::new(property, value));
        self
    }

    /// Wraps rows in cells and keeps those matching every filter
    pub fn filter<T: Describe>(&self, items: impl IntoIterator<Item = T>) -> Filtered<T> {
        let cells = items
            .into_iter()
            .map(DataCell::new)
            .filter(|cell| self.filter.iter().all(|f| f.keeps(cell)))
            .collect();
        Filtered { cells }
    }

    /// Runs the full pipeline
    pub fn select<T: Describe>(&self, items: impl IntoIterator<Item = T>) -> Selection<T> {
        self.filter(items).select(self)
    }
}

// === impl Filtered ===

impl<T> Filtered<T> {
    pub fn total(&self) -> usize {
        self.cells.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.cells.iter().map(DataCell::item)
    }

    /// Sorts and paginates the filtered rows
    pub fn select(mut self, query: &DataSelectQuery) -> Selection<T> {
        let total = self.cells.len();
        // `sort_by` is stable, so rows with equal keys keep their input order.
        self.cells.sort_by(|a, b| {
            query
                .sort
                .iter()
                .map(|s| s.compare(a, b))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        let Paginate { offset, limit } = query.paginate;
        let offset = offset.min(total);
        let items = self
            .cells
            .into_iter()
            .skip(offset)
            .take(if limit == 0 { total } else { limit })
            .map(DataCell::into_item)
            .collect();
        Selection { items, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Row {
        name: &'static str,
        status: Option<&'static str>,
        unused: bool,
        rank: i64,
    }

    impl Describe for Row {
        fn describe(&self) -> Properties {
            Properties::default()
                .with(Property::Name, self.name)
                .with_opt(Property::Status, self.status)
                .with(Property::Unused, self.unused)
                .with(Property::Version, self.rank)
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            Row { name: "web-b", status: Some("Running"), unused: false, rank: 1 },
            Row { name: "db", status: Some("Pending"), unused: true, rank: 2 },
            Row { name: "web-a", status: None, unused: true, rank: 1 },
            Row { name: "cache", status: Some("running"), unused: false, rank: 3 },
        ]
    }

    fn names<T>(sel: &Selection<T>, f: impl Fn(&T) -> &'static str) -> Vec<&'static str> {
        sel.items.iter().map(f).collect()
    }

    #[test]
    fn unknown_filter_properties_exclude_everything() {
        let q = DataSelectQuery::from_params(["colour=red"], [], Paginate::default()).unwrap();
        let sel = q.select(rows());
        assert_eq!(sel.total, 0);
        assert!(sel.items.is_empty());
    }

    #[test]
    fn absent_properties_are_ignored_by_filters() {
        let q = DataSelectQuery::from_params(["status=RUN"], [], Paginate::default()).unwrap();
        let sel = q.select(rows());
        // web-a has no status and is kept.
        assert_eq!(names(&sel, |r| r.name), ["cache", "web-a", "web-b"]);
        assert_eq!(sel.total, 3);
    }

    #[test]
    fn filters_conjoin() {
        let q = DataSelectQuery::from_params(["name=web", "unused=true"], [], Paginate::default())
            .unwrap();
        assert_eq!(names(&q.select(rows()), |r| r.name), ["web-a"]);
    }

    #[test]
    fn sort_is_stable_and_multi_key() {
        let q = DataSelectQuery::from_params([], ["-version"], Paginate::default()).unwrap();
        // web-b and web-a share a rank and keep their input order.
        assert_eq!(
            names(&q.select(rows()), |r| r.name),
            ["cache", "db", "web-b", "web-a"]
        );

        let q =
            DataSelectQuery::from_params([], ["+version", "name"], Paginate::default()).unwrap();
        assert_eq!(
            names(&q.select(rows()), |r| r.name),
            ["web-a", "web-b", "db", "cache"]
        );
    }

    #[test]
    fn unknown_sort_properties_compare_equal() {
        let q = DataSelectQuery::from_params([], ["-colour"], Paginate::default()).unwrap();
        assert_eq!(
            names(&q.select(rows()), |r| r.name),
            ["web-b", "db", "web-a", "cache"]
        );
    }

    #[test]
    fn pages_concatenate_to_the_sorted_list() {
        let full = DataSelectQuery::default().select(rows());
        for k in 1..=5 {
            let mut pages = Vec::new();
            let mut offset = 0;
            while offset < full.total {
                let q = DataSelectQuery {
                    paginate: Paginate { offset, limit: k },
                    ..Default::default()
                };
                let page = q.select(rows());
                assert_eq!(page.total, full.total);
                pages.extend(page.items);
                offset += k;
            }
            assert_eq!(pages, full.items);
        }
    }

    #[test]
    fn offsets_are_clamped() {
        let q = DataSelectQuery {
            paginate: Paginate {
                offset: 10,
                limit: 2,
            },
            ..Default::default()
        };
        let sel = q.select(rows());
        assert!(sel.items.is_empty());
        assert_eq!(sel.total, 4);
    }

    #[test]
    fn rejects_malformed_params() {
        assert!(DataSelectQuery::from_params(["name"], [], Paginate::default()).is_err());
        assert!(DataSelectQuery::from_params([], ["-"], Paginate::default()).is_err());
    }
}
