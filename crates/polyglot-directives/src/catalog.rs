//! Directive catalogs
//!
//! A catalog is the authoritative set of directives for a parse. Entries are
//! either global (owned by the kernel that parses, such as kernel selectors
//! on a composite) or owned by one named kernel, in which case they are only
//! visible while code is being routed to that kernel.
//!
//! When a catalog is *exhaustive* for a kernel, an unrecognized `#!` line is
//! an error. Otherwise it is treated as language code, since `#!` means
//! something of its own in several languages.

use crate::directive::KernelDirective;
use crate::error::{DirectiveError, Result};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub directive: Arc<KernelDirective>,
    /// Kernel the directive belongs to; `None` for global entries
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DirectiveCatalog {
    entries: Vec<CatalogEntry>,
    exhaustive: bool,
    exhaustive_kernels: HashSet<String>,
}

impl DirectiveCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a global directive
    pub fn add(&mut self, directive: KernelDirective) -> Result<()> {
        self.insert(Arc::new(directive), None)
    }

    /// Register a directive visible only while routing to `kernel`
    pub fn add_for_kernel(&mut self, kernel: &str, directive: KernelDirective) -> Result<()> {
        self.insert(Arc::new(directive), Some(kernel.to_string()))
    }

    /// Import every global entry of `other` as owned by `kernel`
    pub fn merge_from_kernel(&mut self, kernel: &str, other: &DirectiveCatalog) -> Result<()> {
        for entry in &other.entries {
            let owner = entry.owner.clone().or_else(|| Some(kernel.to_string()));
            self.insert(entry.directive.clone(), owner)?;
        }
        if other.exhaustive {
            self.exhaustive_kernels.insert(kernel.to_string());
        }
        self.exhaustive_kernels
            .extend(other.exhaustive_kernels.iter().cloned());
        Ok(())
    }

    fn insert(&mut self, directive: Arc<KernelDirective>, owner: Option<String>) -> Result<()> {
        directive.validate()?;
        for name in directive.name_and_aliases() {
            let clash = self
                .entries
                .iter()
                .filter(|e| e.owner == owner)
                .any(|e| e.directive.name_and_aliases().any(|n| n == name));
            if clash {
                return Err(DirectiveError::DuplicateDirective {
                    name: name.to_string(),
                });
            }
        }
        self.entries.push(CatalogEntry { directive, owner });
        Ok(())
    }

    /// Remove every entry owned by `kernel`
    pub fn remove_kernel(&mut self, kernel: &str) {
        self.entries.retain(|e| e.owner.as_deref() != Some(kernel));
        self.exhaustive_kernels.remove(kernel);
    }

    /// Resolve `name` while routing to `kernel`. Entries owned by that
    /// kernel shadow global ones.
    pub fn find(&self, name: &str, kernel: Option<&str>) -> Option<&CatalogEntry> {
        let answers = |e: &&CatalogEntry| e.directive.name_and_aliases().any(|n| n == name);
        kernel
            .and_then(|k| {
                self.entries
                    .iter()
                    .filter(|e| e.owner.as_deref() == Some(k))
                    .find(answers)
            })
            .or_else(|| self.entries.iter().filter(|e| e.owner.is_none()).find(answers))
    }

    /// Entries visible while routing to `kernel`
    pub fn visible_to<'a>(&'a self, kernel: Option<&'a str>) -> impl Iterator<Item = &'a CatalogEntry> {
        self.entries
            .iter()
            .filter(move |e| e.owner.is_none() || e.owner.as_deref() == kernel)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Make unknown `#!` lines an error for every kernel
    pub fn set_exhaustive(&mut self, exhaustive: bool) {
        self.exhaustive = exhaustive;
    }

    /// Make unknown `#!` lines an error while routing to `kernel`
    pub fn set_exhaustive_for(&mut self, kernel: &str) {
        self.exhaustive_kernels.insert(kernel.to_string());
    }

    pub fn is_exhaustive_for(&self, kernel: Option<&str>) -> bool {
        self.exhaustive || kernel.map(|k| self.exhaustive_kernels.contains(k)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_entries_shadow_global_entries() {
        let mut catalog = DirectiveCatalog::new();
        catalog
            .add(KernelDirective::kernel_selector("#!csharp", "csharp").with_alias("#!c#"))
            .unwrap();
        catalog
            .add_for_kernel("pwsh", KernelDirective::kernel_selector("#!csharp", "elsewhere"))
            .unwrap();

        assert!(catalog.find("#!c#", None).is_some());
        let from_pwsh = catalog.find("#!csharp", Some("pwsh")).unwrap();
        assert_eq!(from_pwsh.owner.as_deref(), Some("pwsh"));
        let from_csharp = catalog.find("#!csharp", Some("csharp")).unwrap();
        assert!(from_csharp.owner.is_none());
    }

    #[test]
    fn test_duplicate_alias_in_same_scope_fails() {
        let mut catalog = DirectiveCatalog::new();
        catalog
            .add(KernelDirective::kernel_selector("#!fsharp", "fsharp").with_alias("#!f#"))
            .unwrap();
        let err = catalog
            .add(KernelDirective::kernel_selector("#!f#", "other"))
            .unwrap_err();
        assert!(matches!(err, DirectiveError::DuplicateDirective { name } if name == "#!f#"));
    }

    #[test]
    fn test_exhaustive_per_kernel() {
        let mut child = DirectiveCatalog::new();
        child.set_exhaustive(true);
        let mut catalog = DirectiveCatalog::new();
        catalog.merge_from_kernel("value", &child).unwrap();

        assert!(catalog.is_exhaustive_for(Some("value")));
        assert!(!catalog.is_exhaustive_for(Some("csharp")));
        assert!(!catalog.is_exhaustive_for(None));
    }
}
