/// Human-readable identity of an opened bus, used in logs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BusInfo {
    pub name: String,
    pub driver: String,
}
