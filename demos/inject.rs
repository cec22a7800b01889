/*
   Append-only zip64 archive engine, in pure Rust.
   Copyright (C) 2023 Matheus Xavier <mxavier@neonimp.com>

   This program is free software: you can redistribute it and/or modify
   it under the terms of the GNU Lesser General Public License as published by
   the Free Software Foundation, either version 3 of the License, or
   (at your option) any later version.

   This program is distributed in the hope that it will be useful,
   but WITHOUT ANY WARRANTY; without even the implied warranty of
   MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
   GNU General Public License for more details.

   You should have received a copy of the GNU Lesser General Public License
   along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use std::fs::File;

use argh::FromArgs;
use zipgraft::{CompressionMethod, ZipArchive};

#[derive(FromArgs)]
/// Inject a file into an existing zip64 archive without rewriting any
/// existing entry data.
struct Args {
    /// source archive
    #[argh(positional)]
    archive: String,

    /// destination archive
    #[argh(positional)]
    output: String,

    /// entry name for the injected file
    #[argh(option, short = 'n')]
    name: String,

    /// file whose contents to inject
    #[argh(option, short = 'f')]
    file: String,

    /// frame the payload as raw deflate blocks instead of storing it
    #[argh(switch)]
    deflate: bool,

    /// raw DOS datetime stamp for the new entry
    #[argh(option, default = "0")]
    datetime: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Args = argh::from_env();

    let mut src = File::open(&args.archive)?;
    let mut archive = ZipArchive::load(&mut src)?;
    println!("{}: {} entries", args.archive, archive.entry_count());

    let data = std::fs::read(&args.file)?;
    let method = if args.deflate {
        CompressionMethod::Deflate
    } else {
        CompressionMethod::Stored
    };
    archive.append_file(args.name.as_str(), &data, method, args.datetime)?;

    let mut dst = File::create(&args.output)?;
    archive.write_to(&mut src, &mut dst)?;
    println!("wrote {}", args.output);
    Ok(())
}
