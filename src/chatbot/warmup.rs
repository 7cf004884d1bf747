//! Warm-up chatter between bot-controlled accounts.
//!
//! Each active account periodically sends a few canned lines to randomly
//! chosen sibling accounts, and known counterparties get one line a day,
//! rotated across the pool. Account status is re-read from the database
//! every round, so deactivating an account takes effect without a restart.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::chatbot::database::{Account, Database};
use crate::chatbot::debounce::ChatTransport;

/// Consecutive failed sends before an account is pulled from rotation.
const FAILURES_BEFORE_DEACTIVATION: u32 = 3;

/// A set of bot-controlled accounts, each with its own transport.
pub struct WarmupPool<T> {
    members: Vec<WarmupMember<T>>,
    lines: Vec<String>,
}

struct WarmupMember<T> {
    account: Account,
    transport: Arc<T>,
    failures: AtomicU32,
}

impl<T: ChatTransport> WarmupPool<T> {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            members: Vec::new(),
            lines,
        }
    }

    pub fn add(&mut self, account: Account, transport: Arc<T>) {
        self.members.push(WarmupMember {
            account,
            transport,
            failures: AtomicU32::new(0),
        });
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    fn status(&self, member: &WarmupMember<T>, database: &Database) -> i64 {
        database
            .account_status(member.account.chat_id)
            .unwrap_or(member.account.status)
    }

    /// One round of inter-account chatter: every active account sends a
    /// third of the pool's size in canned lines, each to a random sibling.
    pub async fn run_round(&self, database: &Database) {
        if self.members.len() < 2 || self.lines.is_empty() {
            return;
        }

        let per_member = self.members.len() / 3;
        for (idx, member) in self.members.iter().enumerate() {
            if self.status(member, database) != 0 {
                continue;
            }

            for _ in 0..per_member {
                let (target, line) = {
                    let mut rng = rand::thread_rng();
                    let target = rng.gen_range(0..self.members.len());
                    let line = self.lines.choose(&mut rng).cloned();
                    (target, line)
                };
                if target == idx {
                    continue;
                }
                let Some(line) = line else { continue };

                let target_chat = self.members[target].account.chat_id;
                match member.transport.send_message(target_chat, &line, true).await {
                    Ok(_) => {
                        member.failures.store(0, Ordering::Relaxed);
                    }
                    Err(e) => {
                        warn!("Warm-up send from {} failed: {}", member.account.name, e);
                        let failed = member.failures.fetch_add(1, Ordering::Relaxed) + 1;
                        if failed >= FAILURES_BEFORE_DEACTIVATION {
                            warn!(
                                "Deactivating {} after {} failed sends",
                                member.account.name, failed
                            );
                            database.set_account_status(member.account.chat_id, 1);
                        }
                    }
                }
            }
        }
    }

    /// Send one line to every known counterparty, rotating across active
    /// accounts. Returns the rotation cursor for the next round.
    pub async fn outreach(&self, database: &Database, users: &[i64], mut cursor: usize) -> usize {
        let active: Vec<&WarmupMember<T>> = self
            .members
            .iter()
            .filter(|m| self.status(m, database) == 0)
            .collect();
        if active.is_empty() || self.lines.is_empty() {
            return cursor;
        }

        for &user_id in users {
            let member = active[cursor % active.len()];
            cursor += 1;

            let line = self.lines.choose(&mut rand::thread_rng()).cloned();
            let Some(line) = line else { break };

            if let Err(e) = member.transport.send_message(user_id, &line, true).await {
                warn!("Outreach from {} to {} failed: {}", member.account.name, user_id, e);
            }
        }
        cursor
    }
}

/// Run warm-up rounds forever on the given period. The first round fires
/// immediately.
pub fn spawn_daily<T: ChatTransport>(
    pool: Arc<WarmupPool<T>>,
    database: Arc<Database>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        let mut cursor = 0usize;
        loop {
            interval.tick().await;
            info!("Warm-up round ({} accounts)", pool.len());
            pool.run_round(&database).await;

            let users = database.all_users();
            cursor = pool.outreach(&database, &users, cursor).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: StdMutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn read_history(&self, _chat_id: i64) -> Result<(), String> {
            Ok(())
        }

        async fn send_typing(&self, _chat_id: i64) -> Result<(), String> {
            Ok(())
        }

        async fn send_message(
            &self,
            chat_id: i64,
            text: &str,
            _notify: bool,
        ) -> Result<i64, String> {
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(1)
        }
    }

    fn account(chat_id: i64, status: i64) -> Account {
        Account {
            chat_id,
            name: format!("acct{chat_id}"),
            status,
        }
    }

    fn pool_with(
        statuses: &[i64],
        database: &Database,
    ) -> (WarmupPool<RecordingTransport>, Vec<Arc<RecordingTransport>>) {
        let mut pool = WarmupPool::new(vec!["hey".to_string(), "what's up".to_string()]);
        let mut transports = Vec::new();
        for (i, &status) in statuses.iter().enumerate() {
            let chat_id = 100 + i as i64;
            database.upsert_account(chat_id, &format!("acct{chat_id}"), status);
            let transport = Arc::new(RecordingTransport::default());
            pool.add(account(chat_id, status), transport.clone());
            transports.push(transport);
        }
        (pool, transports)
    }

    #[tokio::test]
    async fn round_skips_inactive_and_self() {
        let database = Database::new();
        let (pool, transports) = pool_with(&[0, 0, 0, 0, 0, 1], &database);

        pool.run_round(&database).await;

        // 6 members -> up to 2 lines per active member.
        for (i, transport) in transports.iter().enumerate() {
            let sent = transport.sent.lock().unwrap();
            let own_chat = 100 + i as i64;
            if i == 5 {
                assert!(sent.is_empty(), "inactive account must stay silent");
                continue;
            }
            assert!(sent.len() <= 2);
            for (chat_id, line) in sent.iter() {
                assert_ne!(*chat_id, own_chat, "no self-chatter");
                assert!(line == "hey" || line == "what's up");
            }
        }
    }

    #[tokio::test]
    async fn tiny_pool_stays_quiet() {
        let database = Database::new();
        let (pool, transports) = pool_with(&[0], &database);

        pool.run_round(&database).await;
        assert!(transports[0].sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn outreach_rotates_across_active_accounts() {
        let database = Database::new();
        let (pool, transports) = pool_with(&[0, 1, 0], &database);

        let users = vec![11, 22, 33];
        let cursor = pool.outreach(&database, &users, 0).await;
        assert_eq!(cursor, 3);

        // Accounts 0 and 2 are active; user order 11, 22, 33 round-robins
        // over them starting at the first.
        let first: Vec<i64> = transports[0]
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| *id)
            .collect();
        let third: Vec<i64> = transports[2]
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(first, vec![11, 33]);
        assert_eq!(third, vec![22]);
        assert!(transports[1].sent.lock().unwrap().is_empty());
    }

    struct FailingTransport {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl ChatTransport for FailingTransport {
        async fn read_history(&self, _chat_id: i64) -> Result<(), String> {
            Ok(())
        }

        async fn send_typing(&self, _chat_id: i64) -> Result<(), String> {
            Ok(())
        }

        async fn send_message(
            &self,
            _chat_id: i64,
            _text: &str,
            _notify: bool,
        ) -> Result<i64, String> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            Err("USER_DEACTIVATED_BAN".to_string())
        }
    }

    #[tokio::test]
    async fn repeated_send_failures_deactivate_the_account() {
        let database = Database::new();
        let mut pool: WarmupPool<FailingTransport> =
            WarmupPool::new(vec!["hey".to_string()]);

        // Only the first account is active; the rest pad the pool so it
        // attempts two sends per round.
        let failing = Arc::new(FailingTransport {
            attempts: AtomicU32::new(0),
        });
        for i in 0..6 {
            let chat_id = 100 + i as i64;
            let status = if i == 0 { 0 } else { 1 };
            database.upsert_account(chat_id, &format!("acct{chat_id}"), status);
            pool.add(account(chat_id, status), failing.clone());
        }

        for _ in 0..10 {
            pool.run_round(&database).await;
        }

        assert_eq!(database.account_status(100), Some(1));

        // Once deactivated, further rounds attempt nothing.
        let attempts = failing.attempts.load(Ordering::Relaxed);
        pool.run_round(&database).await;
        assert_eq!(failing.attempts.load(Ordering::Relaxed), attempts);
    }

    #[tokio::test]
    async fn outreach_cursor_continues_rotation() {
        let database = Database::new();
        let (pool, transports) = pool_with(&[0, 0], &database);

        let cursor = pool.outreach(&database, &[11], 0).await;
        let cursor = pool.outreach(&database, &[22], cursor).await;
        assert_eq!(cursor, 2);

        assert_eq!(transports[0].sent.lock().unwrap().len(), 1);
        assert_eq!(transports[1].sent.lock().unwrap().len(), 1);
    }
}
