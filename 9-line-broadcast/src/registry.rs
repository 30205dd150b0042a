use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::connection::Connection;

/// The authoritative set of active connections, keyed by username.
///
/// Every access goes through the mutex; broadcast never iterates the map
/// itself, only a snapshot cloned out under the lock.
#[derive(Debug, Default)]
pub struct Registry {
    connections: Mutex<HashMap<String, Arc<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under its username.
    ///
    /// Usernames are not reserved: a second registration under the same name
    /// wins and the displaced connection is returned.
    pub async fn add(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        let mut connections = self.connections.lock().await;
        connections.insert(connection.username().to_string(), connection)
    }

    /// Removes whatever is registered under `username`. Absent names are a no-op.
    pub async fn remove(&self, username: &str) -> Option<Arc<Connection>> {
        let mut connections = self.connections.lock().await;
        connections.remove(username)
    }

    /// Removes `connection` only if its username still maps to it.
    pub async fn remove_connection(&self, connection: &Connection) -> bool {
        let mut connections = self.connections.lock().await;
        let registered = connections
            .get(connection.username())
            .is_some_and(|current| current.id() == connection.id());
        if registered {
            connections.remove(connection.username());
        }
        registered
    }

    /// Consistent copy of the current members, in join order.
    pub async fn snapshot_all(&self) -> Vec<Arc<Connection>> {
        let connections = self.connections.lock().await;
        let mut snapshot: Vec<_> = connections.values().cloned().collect();
        drop(connections);
        snapshot.sort_unstable_by_key(|connection| connection.id());
        snapshot
    }

    pub async fn usernames(&self) -> Vec<String> {
        self.snapshot_all()
            .await
            .iter()
            .map(|connection| connection.username().to_string())
            .collect()
    }

    pub async fn contains(&self, username: &str) -> bool {
        self.connections.lock().await.contains_key(username)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Empties the registry, handing back everything that was in it.
    pub async fn drain(&self) -> Vec<Arc<Connection>> {
        let mut connections = self.connections.lock().await;
        let mut drained: Vec<_> = connections.drain().map(|(_, connection)| connection).collect();
        drop(connections);
        drained.sort_unstable_by_key(|connection| connection.id());
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(id: u64, username: &str) -> Arc<Connection> {
        let (server_side, _client_side) = tokio::io::duplex(64);
        Arc::new(Connection::new(id, username.to_string(), None, server_side))
    }

    #[tokio::test]
    async fn snapshot_is_in_join_order() {
        let registry = Registry::new();
        registry.add(connection(3, "carol")).await;
        registry.add(connection(1, "alice")).await;
        registry.add(connection(2, "bob")).await;

        assert_eq!(registry.usernames().await, vec!["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = Registry::new();
        registry.add(connection(1, "alice")).await;

        assert!(registry.remove("alice").await.is_some());
        assert!(registry.remove("alice").await.is_none());
        assert!(registry.remove("nobody").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn last_registration_wins_on_name_collision() {
        let registry = Registry::new();
        let first = connection(1, "alice");
        let second = connection(2, "alice");

        assert!(registry.add(Arc::clone(&first)).await.is_none());
        let displaced = registry
            .add(Arc::clone(&second))
            .await
            .expect("first alice should be displaced");

        assert_eq!(displaced.id(), 1);
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.snapshot_all().await[0].id(), 2);
    }

    #[tokio::test]
    async fn displaced_connection_cannot_evict_its_successor() {
        let registry = Registry::new();
        let first = connection(1, "alice");
        let second = connection(2, "alice");
        registry.add(Arc::clone(&first)).await;
        registry.add(Arc::clone(&second)).await;

        assert!(!registry.remove_connection(&first).await);
        assert!(registry.contains("alice").await);
        assert!(registry.remove_connection(&second).await);
        assert!(!registry.contains("alice").await);
    }

    #[tokio::test]
    async fn snapshot_is_unaffected_by_later_mutation() {
        let registry = Registry::new();
        registry.add(connection(1, "alice")).await;
        registry.add(connection(2, "bob")).await;

        let snapshot = registry.snapshot_all().await;
        registry.remove("alice").await;
        registry.add(connection(3, "carol")).await;

        let names: Vec<_> = snapshot.iter().map(|c| c.username()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert_eq!(registry.usernames().await, vec!["bob", "carol"]);
    }

    #[tokio::test]
    async fn concurrent_adds_and_removes_stay_consistent() {
        let registry = Arc::new(Registry::new());
        let mut tasks = Vec::new();
        for id in 1..=64u64 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let username = format!("user-{id}");
                registry.add(connection(id, &username)).await;
                if id % 2 == 0 {
                    registry.remove(&username).await;
                }
                registry.snapshot_all().await.len()
            }));
        }
        for task in tasks {
            task.await.expect("task should not panic");
        }

        assert_eq!(registry.len().await, 32);
        let drained = registry.drain().await;
        assert_eq!(drained.len(), 32);
        assert!(drained.iter().all(|c| c.id() % 2 == 1));
        assert!(registry.is_empty().await);
    }
}
