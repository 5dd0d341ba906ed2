use crate::registry::RoomRegistryHandle;

#[derive(Clone)]
pub struct AppState {
    pub registry: RoomRegistryHandle,
}
