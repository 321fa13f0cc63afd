// 该文件是 Chexun （车巡） 项目的一部分。
// src/output/multipart.rs - multipart 推流分帧
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::io::Write;

pub const MULTIPART_BOUNDARY: &str = "frame";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// 推流的一个输出单元：一张 JPEG 图像
#[derive(Debug, Clone)]
pub struct EncodedFrame {
  pub index: u64,
  pub jpeg: Vec<u8>,
}

impl EncodedFrame {
  pub fn multipart_part(&self) -> Vec<u8> {
    let mut payload = Vec::with_capacity(self.jpeg.len() + 64);
    // Vec 写入不会失败
    let _ = self.write_multipart(&mut payload);
    payload
  }

  pub fn write_multipart<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
    write!(
      writer,
      "--{}\r\nContent-Type: image/jpeg\r\n\r\n",
      MULTIPART_BOUNDARY
    )?;
    writer.write_all(&self.jpeg)?;
    writer.write_all(b"\r\n")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn part_is_framed_with_boundary() {
    let frame = EncodedFrame {
      index: 0,
      jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
    };
    let part = frame.multipart_part();

    let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    assert!(part.starts_with(header));
    assert_eq!(&part[header.len()..header.len() + 4], &frame.jpeg[..]);
    assert!(part.ends_with(b"\r\n"));
    assert_eq!(part.len(), header.len() + 4 + 2);
  }
}
