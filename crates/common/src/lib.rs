// intelhub-common: wire types shared by the collaboration hub and its clients

pub mod protocol;
pub mod types;
