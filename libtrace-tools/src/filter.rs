/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use libtrace_syscalls::LinuxTable;
use libtrace_syscalls::Sysno;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Deserialize, Serialize, Eq, PartialEq)]
pub struct Filter {
    /// Inverses the match.
    pub inverse: bool,

    /// The set of syscalls to match.
    pub syscalls: Vec<Sysno>,
}

impl Filter {
    /// Resolves the filter to the names of the syscalls it selects.
    pub fn names(&self, table: &LinuxTable) -> Vec<String> {
        if self.inverse {
            let mut names: Vec<String> = table
                .iter()
                .filter(|sig| !self.syscalls.iter().any(|s| s.name() == sig.name))
                .map(|sig| sig.name.clone())
                .collect();
            names.sort();
            names
        } else {
            self.syscalls.iter().map(|s| s.name().to_owned()).collect()
        }
    }
}

/// Merges several `--trace` filters into one list of names. An empty list
/// means every syscall.
pub fn selected(filters: &[Filter], table: &LinuxTable) -> Vec<String> {
    let mut names: Vec<String> = filters.iter().flat_map(|f| f.names(table)).collect();
    names.sort();
    names.dedup();
    names
}

impl std::str::FromStr for Filter {
    type Err = String;

    // Must parse this: [!]value1[,value2]...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (inverse, s) = match s.strip_prefix('!') {
            Some(s) => (true, s),
            None => (false, s),
        };

        let mut syscalls = Vec::new();

        for value in s.split(',') {
            if value.starts_with('%') {
                return Err("filtering sets of syscalls is not supported".into());
            }

            let syscall: Sysno = value
                .parse()
                .map_err(|()| format!("invalid syscall name '{}'", value))?;

            syscalls.push(syscall);
        }

        Ok(Self { inverse, syscalls })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_filter() {
        assert_eq!(
            "openat,mmap".parse(),
            Ok(Filter {
                inverse: false,
                syscalls: vec![Sysno::openat, Sysno::mmap]
            })
        );

        assert_eq!(
            "openat,foobar".parse::<Filter>(),
            Err("invalid syscall name 'foobar'".into())
        );

        assert_eq!(
            "!read,write".parse(),
            Ok(Filter {
                inverse: true,
                syscalls: vec![Sysno::read, Sysno::write]
            })
        );

        assert!("%file".parse::<Filter>().is_err());
    }

    #[test]
    fn resolve_names() {
        let table = LinuxTable::get();

        let filters = ["read,write".parse().unwrap(), "write,close".parse().unwrap()];
        assert_eq!(selected(&filters, table), ["close", "read", "write"]);

        let inverse: Filter = "!read".parse().unwrap();
        let names = inverse.names(table);
        assert_eq!(names.len(), table.len() - 1);
        assert!(!names.iter().any(|n| n == "read"));
        assert!(names.iter().any(|n| n == "write"));

        assert!(selected(&[], table).is_empty());
    }
}
