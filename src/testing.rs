// ====================================================================================
// src/testing.rs - 测试用的协作者替身
// ====================================================================================
use crate::{
    error::AppError,
    hub::{Hub, HubSettings},
    models::{AlbumObject, ArtistObject, Event, Image, RoomRecord, Song, TrackObject, UserRecord},
    services::{MusicProvider, RoomStore},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

pub fn song(id: &str, duration_ms: u64) -> Song {
    Song {
        id: id.to_string(),
        uri: format!("spotify:track:{}", id),
        name: format!("Song {}", id),
        artists: vec!["Artist".to_string()],
        album: "Album".to_string(),
        image: Image::default(),
        duration_ms,
        explicit: false,
        external_url: format!("https://open.spotify.com/track/{}", id),
    }
}

pub fn room_record(host_id: i64) -> RoomRecord {
    RoomRecord {
        id: Uuid::new_v4(),
        name: "Test room".to_string(),
        description: None,
        host_id,
        public: true,
        created_at: 0,
    }
}

pub fn drain(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut received = Vec::new();
    while let Ok(event) = rx.try_recv() {
        received.push(event);
    }
    received
}

pub fn event_types(events: &[Event]) -> Vec<&str> {
    events.iter().map(|e| e.event_type.as_str()).collect()
}

#[derive(Default)]
pub struct MockProvider {
    tracks: Mutex<HashMap<String, Song>>,
    fail_tokens: AtomicBool,
    token_calls: AtomicUsize,
    last_search: Mutex<Option<(String, i64)>>,
}

impl MockProvider {
    pub fn add_track(&self, song: Song) {
        self.tracks.lock().unwrap().insert(song.id.clone(), song);
    }

    pub fn fail_tokens(&self, fail: bool) {
        self.fail_tokens.store(fail, Ordering::SeqCst);
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn last_search(&self) -> Option<(String, i64)> {
        self.last_search.lock().unwrap().clone()
    }
}

#[async_trait]
impl MusicProvider for MockProvider {
    async fn playback_token(&self, host_id: i64) -> Result<String, AppError> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_tokens.load(Ordering::SeqCst) {
            return Err(AppError::Provider("token refresh failed".to_string()));
        }
        Ok(format!("token-for-{}", host_id))
    }

    async fn search_tracks(&self, query: &str, host_id: i64) -> Result<Vec<TrackObject>, AppError> {
        *self.last_search.lock().unwrap() = Some((query.to_string(), host_id));
        let tracks = self.tracks.lock().unwrap();
        let mut songs: Vec<&Song> = tracks.values().collect();
        songs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(songs
            .into_iter()
            .map(|s| TrackObject {
                id: s.id.clone(),
                uri: s.uri.clone(),
                name: s.name.clone(),
                artists: s.artists.iter().map(|name| ArtistObject { name: name.clone() }).collect(),
                album: AlbumObject { name: s.album.clone(), images: Vec::new() },
                duration_ms: s.duration_ms,
                explicit: s.explicit,
                external_urls: HashMap::from([("spotify".to_string(), s.external_url.clone())]),
            })
            .collect())
    }

    async fn lookup_track(&self, track_id: &str, _host_id: i64) -> Result<Song, AppError> {
        self.tracks
            .lock()
            .unwrap()
            .get(track_id)
            .cloned()
            .ok_or_else(|| AppError::Provider(format!("spotify track {} not found", track_id)))
    }
}

#[derive(Default)]
pub struct MockStore {
    rooms: HashMap<Uuid, RoomRecord>,
}

impl MockStore {
    pub fn with_room(record: RoomRecord) -> Self {
        Self { rooms: HashMap::from([(record.id, record)]) }
    }
}

#[async_trait]
impl RoomStore for MockStore {
    async fn load_room(&self, room_id: Uuid) -> Result<RoomRecord, AppError> {
        self.rooms
            .get(&room_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Room {} not found", room_id)))
    }

    async fn load_user(&self, user_id: i64) -> Result<UserRecord, AppError> {
        Ok(UserRecord { id: user_id, username: format!("user{}", user_id) })
    }
}

// 房主为 1 的单房间 hub
pub fn hub_with_room(retain_empty_rooms: bool) -> (Hub, Uuid, Arc<MockProvider>) {
    let record = room_record(1);
    let room_id = record.id;
    let provider = Arc::new(MockProvider::default());
    let hub = Hub::new(
        Arc::new(MockStore::with_room(record)),
        provider.clone(),
        HubSettings { outbound_queue_capacity: 64, retain_empty_rooms },
    );
    (hub, room_id, provider)
}
