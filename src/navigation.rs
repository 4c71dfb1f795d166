//! # Navigation: Page-Level Table State
//!
//! The filter, pagination and sort state of one task table, plus the project
//! it belongs to. The page that shows the table owns a `NavigationState` and
//! passes it by reference to the view-models; there is no process-wide store.
//!
//! Every change bumps [`NavigationState::generation`], which lets callers
//! notice that a refresh is due without diffing the whole state.

use crate::filters::{FilterSpec, PaginationSpec, SortKey, SortSpec};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Cache key for one page of tasks: the full parameter tuple of the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TasksKey {
    pub project_id: String,
    pub filters: FilterSpec,
    pub pagination: PaginationSpec,
    pub sorting: SortSpec,
}

/// Cache key for a filtered count. Pagination and sort do not affect a count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CountKey {
    pub project_id: String,
    pub filters: FilterSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavigationState {
    project_id: Option<String>,
    filters: FilterSpec,
    pagination: PaginationSpec,
    sorting: SortSpec,
    #[serde(skip)]
    generation: u64,
}

impl NavigationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_project(project_id: &str) -> Self {
        let mut state = Self::default();
        state.set_project(Some(project_id.to_string()));
        state
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn filters(&self) -> &FilterSpec {
        &self.filters
    }

    pub fn pagination(&self) -> &PaginationSpec {
        &self.pagination
    }

    pub fn sorting(&self) -> &[SortKey] {
        &self.sorting
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn touch(&mut self, what: &str) {
        self.generation += 1;
        debug!(generation = self.generation, change = what, "navigation state changed");
    }

    /// Switch project. Filters and paging from another project are meaningless
    /// here, so they reset too.
    pub fn set_project(&mut self, project_id: Option<String>) {
        if self.project_id == project_id {
            return;
        }
        self.project_id = project_id;
        self.filters = FilterSpec::default();
        self.pagination.page_index = 0;
        self.touch("project");
    }

    /// Replace the filters. Returns to the first page, since the old page index
    /// may not exist under the new filters.
    pub fn set_filters(&mut self, filters: FilterSpec) {
        let filters = filters.normalized();
        if self.filters == filters {
            return;
        }
        self.filters = filters;
        self.pagination.page_index = 0;
        self.touch("filters");
    }

    /// Edit the filters in place, with the same page reset as [`Self::set_filters`].
    pub fn update_filters(&mut self, edit: impl FnOnce(&mut FilterSpec)) {
        let mut filters = self.filters.clone();
        edit(&mut filters);
        self.set_filters(filters);
    }

    /// Install (or with `None`, drop) the id allowlist. At most one allowlist is
    /// active: a new one replaces the previous one.
    pub fn set_id_allowlist(&mut self, ids: Option<Vec<String>>) {
        self.update_filters(|filters| filters.id_allowlist = ids);
    }

    /// Drop every filter and go back to the first page. Sort and page size stay.
    pub fn clear_filters(&mut self) {
        self.set_filters(FilterSpec::default());
    }

    pub fn set_page_index(&mut self, page_index: u32) {
        if self.pagination.page_index == page_index {
            return;
        }
        self.pagination.page_index = page_index;
        self.touch("page_index");
    }

    pub fn set_page_size(&mut self, page_size: u32) {
        let page_size = page_size.max(1);
        if self.pagination.page_size == page_size {
            return;
        }
        self.pagination.page_size = page_size;
        self.pagination.page_index = 0;
        self.touch("page_size");
    }

    /// Advance one page, staying below `page_count`. Returns whether it moved.
    pub fn next_page(&mut self, page_count: u32) -> bool {
        let next = self.pagination.page_index.saturating_add(1);
        if next >= page_count || next == self.pagination.page_index {
            return false;
        }
        self.set_page_index(next);
        true
    }

    pub fn previous_page(&mut self) -> bool {
        if self.pagination.page_index == 0 {
            return false;
        }
        self.set_page_index(self.pagination.page_index - 1);
        true
    }

    pub fn set_sorting(&mut self, sorting: SortSpec) {
        if self.sorting == sorting {
            return;
        }
        self.sorting = sorting;
        self.touch("sorting");
    }

    /// Key of the page request for the current state, or `None` with no project.
    pub fn tasks_key(&self) -> Option<TasksKey> {
        let project_id = self.project_id.clone()?;
        Some(TasksKey {
            project_id,
            filters: self.filters.clone(),
            pagination: self.pagination,
            sorting: self.sorting.clone(),
        })
    }

    /// Key of the count request for the current state, or `None` with no project.
    pub fn count_key(&self) -> Option<CountKey> {
        let project_id = self.project_id.clone()?;
        Some(CountKey {
            project_id,
            filters: self.filters.clone(),
        })
    }
}
