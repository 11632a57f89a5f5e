#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset, Local, TimeDelta, TimeZone, Utc};
use library_circulation::{
    Actor, Book, Config, CreateBookRequest, LifecycleEngine, Role, User,
    store::{LibraryStore, MemoryStore},
};
use mockable::Clock;

pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }

    pub fn advance(&self, delta: TimeDelta) {
        *self.0.lock().unwrap() += delta;
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

pub fn utc_offset() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

/// Monday 3 March 2025, 09:15 UTC.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 15, 0).single().unwrap()
}

pub fn test_config() -> Config {
    Config {
        database_url: None,
        jwt_secret: "super_secret_test_key".into(),
        server_port: 0,
        library_utc_offset: utc_offset(),
        bootstrap_admin_email: Some("admin@library.test".into()),
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<MutableClock>,
    pub engine: LifecycleEngine,
    pub admin: Actor,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(MutableClock::new(t0()));
        let engine = LifecycleEngine::new(store.clone(), clock.clone(), utc_offset());
        let admin_user = user("Admin", Role::Admin);
        store.insert_user(&admin_user).await.unwrap();
        let admin = Actor { user_id: admin_user.id, role: Role::Admin };
        Self { store, clock, engine, admin }
    }

    pub async fn reader(&self, name: &str) -> Actor {
        let reader = user(name, Role::Reader);
        self.store.insert_user(&reader).await.unwrap();
        Actor { user_id: reader.id, role: Role::Reader }
    }

    pub async fn book(&self, title: &str, isbn: &str) -> Book {
        let book = Book::new(
            CreateBookRequest {
                title: title.into(),
                author: "Frank Herbert".into(),
                category: "Science Fiction".into(),
                published_date: "1965".into(),
                isbn: isbn.into(),
            },
            self.clock.utc(),
        );
        self.store.insert_book(&book).await.unwrap();
        book
    }

    pub async fn points(&self, actor: &Actor) -> i64 {
        self.store.find_user(actor.user_id).await.unwrap().unwrap().points
    }
}

pub fn user(name: &str, role: Role) -> User {
    User::new(
        name.into(),
        format!("{}@library.test", name.to_lowercase()),
        String::new(),
        role,
        t0(),
    )
}
