use std::collections::{HashMap, HashSet};

use sysinfo::Users;

/// uid → user name, owned by a single provider instance.
#[derive(Default)]
pub struct UserCache {
    names: HashMap<u32, String>,
    users: Option<Users>,
}

impl UserCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached name for `uid`. A miss reloads the user database once; uids
    /// without an account fall back to the number.
    pub fn name_for(&mut self, uid: u32) -> String {
        if let Some(name) = self.names.get(&uid) {
            return name.clone();
        }
        let mut name = self.users.as_ref().and_then(|users| lookup(users, uid));
        if name.is_none() {
            let users = Users::new_with_refreshed_list();
            name = lookup(&users, uid);
            self.users = Some(users);
        }
        let name = name.unwrap_or_else(|| uid.to_string());
        self.names.insert(uid, name.clone());
        name
    }

    /// Forget uids that were not observed in the latest scan.
    pub fn retain(&mut self, seen: &HashSet<u32>) {
        self.names.retain(|uid, _| seen.contains(uid));
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn lookup(users: &Users, uid: u32) -> Option<String> {
    users
        .list()
        .iter()
        .find(|user| **user.id() == uid)
        .map(|user| user.name().to_string())
}
