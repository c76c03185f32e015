use weft_serde::{BitStream, Serde, SerdeErr};

use crate::types::ViewId;

use super::entity_host::EntityHost;

/// Collect the handover payload of each view the host agrees to hand over.
/// Views whose serializer returns `false` are left out.
pub fn write_instances<H: EntityHost + ?Sized>(host: &mut H, views: &[ViewId]) -> BitStream {
    let mut payloads = Vec::with_capacity(views.len());
    for view in views {
        let mut payload = BitStream::new();
        if host.serialize_handover(&mut payload, *view) {
            payloads.push((*view, payload));
        }
    }

    let mut instances = BitStream::new();
    instances.write_var_u64(payloads.len() as u64);
    for (view, payload) in &payloads {
        view.ser(&mut instances);
        instances.write_stream(payload);
    }
    instances
}

/// Split a handover payload back into per-view streams
pub fn read_instances(instances: &mut BitStream) -> Result<Vec<(ViewId, BitStream)>, SerdeErr> {
    let count = instances.read_var_u64()?;
    let mut output = Vec::new();
    for _ in 0..count {
        let view = ViewId::de(instances)?;
        output.push((view, instances.read_stream()?));
    }
    Ok(output)
}
