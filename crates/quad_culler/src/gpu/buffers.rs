use bytemuck::Pod;

use crate::error::{CullError, CullResult};

/// Map a `MAP_READ` buffer and copy its contents out as `T`.
pub async fn map_buffer<T: Pod>(buffer: &wgpu::Buffer, device: &wgpu::Device) -> CullResult<Vec<T>> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    receiver
        .await
        .map_err(|_| CullError::BufferMap("map callback dropped".into()))?
        .map_err(|e| CullError::BufferMap(e.to_string()))?;
    let data = slice.get_mapped_range();
    let result = bytemuck::cast_slice::<u8, T>(&data).to_vec();
    drop(data);
    buffer.unmap();
    Ok(result)
}
