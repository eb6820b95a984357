// Generated by build.rs (tonic-build) into this directory

pub mod common {
    include!("achados.common.rs");
}

pub mod auth {
    include!("achados.auth.rs");
}

pub mod items {
    include!("achados.items.rs");
}

pub mod categories {
    include!("achados.categories.rs");
}

pub mod health {
    include!("grpc.health.v1.rs");
}
