//! Section-level garbage collection.
//!
//! Sections form a graph: a relocation patching section A against a
//! symbol defined in section B means A needs B. Starting from caller
//! roots plus every `GNU_RETAIN`-flagged section, the reachable set is
//! closed over those edges and everything else is dropped.

use std::collections::{HashMap, HashSet};

use super::constants::SectionFlags;
use super::types::{Image, SectionId};

impl Image {
    /// Drops every section not reachable from `roots`.
    ///
    /// Sections flagged `GNU_RETAIN` count as roots. Relocation groups
    /// and symbols belonging to dropped sections are pruned along with
    /// them, so the remaining graph only references live records.
    ///
    /// Relocation tables are not sections at this point (the reader
    /// absorbs them), so edges come from the in-memory relocation map.
    pub fn gc_sections(&mut self, roots: &[SectionId]) {
        let mut pending: HashSet<SectionId> = roots.iter().copied().collect();
        for &id in &self.section_list {
            if self.sections[id.0 as usize]
                .flags
                .contains(SectionFlags::GNU_RETAIN)
            {
                pending.insert(id);
            }
        }

        let mut children: HashMap<SectionId, HashSet<SectionId>> = HashMap::new();
        for (&target, relocations) in &self.relocations {
            for relocation in relocations {
                let Some(symbol) = relocation.symbol else {
                    continue;
                };
                if let Some(section) = self.symbols[symbol.0 as usize].section {
                    children.entry(target).or_default().insert(section);
                }
            }
        }

        // Breadth-wise fixed point over the edge set.
        let mut retained: HashSet<SectionId> = HashSet::new();
        while !pending.is_empty() {
            let mut next = HashSet::new();
            for id in pending {
                retained.insert(id);
                if let Some(children) = children.get(&id) {
                    for &child in children {
                        if !retained.contains(&child) {
                            next.insert(child);
                        }
                    }
                }
            }
            pending = next;
        }

        for &id in &self.section_list {
            if !retained.contains(&id) {
                log::debug!("gc: removing section {}", self.sections[id.0 as usize].name);
            }
        }
        self.section_list.retain(|id| retained.contains(id));
        self.relocations.retain(|target, _| retained.contains(target));
        let symbols = &self.symbols;
        self.symbol_list.retain(|&id| {
            match symbols[id.0 as usize].section {
                Some(section) => retained.contains(&section),
                None => true,
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::super::constants::{Class, Endian, SectionType, SymbolBinding};
    use super::super::types::{Relocation, Section, Symbol};
    use super::*;

    fn image_with(names: &[&str]) -> (Image, Vec<SectionId>) {
        let mut image = Image::new(Class::Elf64, Endian::Little);
        let ids = names
            .iter()
            .map(|name| image.add_section(Section::new(*name, SectionType::PROGBITS)))
            .collect();
        (image, ids)
    }

    fn link(image: &mut Image, from: SectionId, to: SectionId) {
        let sym = image.add_symbol(Symbol {
            name: format!("sym{}", image.symbol_count()),
            binding: SymbolBinding::LOCAL,
            section: Some(to),
            ..Symbol::default()
        });
        image.add_relocation(Relocation {
            section: from,
            symbol: Some(sym),
            offset: 0,
            rel_type: 1,
            addend: 0,
        });
    }

    #[test]
    fn unreferenced_sections_are_dropped() {
        let (mut image, ids) = image_with(&["a", "b", "c"]);
        image.section_mut(ids[0]).flags |= SectionFlags::GNU_RETAIN;
        link(&mut image, ids[0], ids[2]);

        image.gc_sections(&[]);

        let names: Vec<&str> = image.sections().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "c"]);
    }

    #[test]
    fn closure_follows_relocation_chains() {
        let (mut image, ids) = image_with(&["a", "b", "c", "d"]);
        link(&mut image, ids[0], ids[1]);
        link(&mut image, ids[1], ids[2]);
        // d references a, but nothing references d.
        link(&mut image, ids[3], ids[0]);

        image.gc_sections(&[ids[0]]);

        let names: Vec<&str> = image.sections().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn cycles_terminate() {
        let (mut image, ids) = image_with(&["a", "b"]);
        link(&mut image, ids[0], ids[1]);
        link(&mut image, ids[1], ids[0]);

        image.gc_sections(&[ids[0]]);
        assert_eq!(image.section_count(), 2);
    }

    #[test]
    fn retain_flag_roots_without_explicit_roots() {
        let (mut image, ids) = image_with(&["keep", "drop"]);
        image.section_mut(ids[0]).flags |= SectionFlags::GNU_RETAIN;

        image.gc_sections(&[]);

        assert_eq!(image.section_count(), 1);
        assert!(image.section_by_name("keep").is_some());
        assert!(image.section_by_name("drop").is_none());
    }

    #[test]
    fn dropped_sections_lose_relocations_and_symbols() {
        let (mut image, ids) = image_with(&["a", "b"]);
        link(&mut image, ids[1], ids[1]);
        let kept = image.add_symbol(Symbol {
            name: "kept".into(),
            section: Some(ids[0]),
            ..Symbol::default()
        });
        let absolute = image.add_symbol(Symbol {
            name: "absolute".into(),
            section: None,
            ..Symbol::default()
        });

        image.gc_sections(&[ids[0]]);

        assert!(image.relocations(ids[1]).is_empty());
        assert_eq!(image.relocation_targets().count(), 0);
        // Symbols in dropped sections go; sectionless symbols stay.
        assert!(image.symbol_ids().any(|id| id == kept));
        assert!(image.symbol_ids().any(|id| id == absolute));
        assert_eq!(image.symbol_count(), 3 - 1);
    }

    #[test]
    fn order_is_preserved_after_collection() {
        let (mut image, ids) = image_with(&["one", "two", "three", "four"]);
        image.gc_sections(&[ids[3], ids[1]]);
        let names: Vec<&str> = image.sections().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["two", "four"]);
    }
}
