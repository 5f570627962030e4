//! Reading and writing of component models in text or binary form
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::Path;
use std::str::FromStr;
use crate::error::*;

/// Trait implemented by everything that can be loaded from / saved to a model stream
pub trait Persistence<U,P> {
    /// Load the state from the stream
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`ConfigReadError`]
    fn load(&mut self, persistence:&mut P) -> Result<(),ConfigReadError>;
    /// Save the state to the stream
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`PersistenceError`]
    fn save(&self, persistence:&mut P) -> Result<(),PersistenceError>;
}
pub trait SaveToFile<U> {
    fn save<P: AsRef<Path>>(&self,file:P) -> Result<(),io::Error>;
}
/// Reading side of a model stream
pub trait ReadPersistence<U> {
    fn read_token(&mut self) -> Result<String,ConfigReadError>;
    fn read_unit(&mut self) -> Result<U,ConfigReadError>;
    fn read_usize(&mut self) -> Result<usize,ConfigReadError>;
    fn read_bool(&mut self) -> Result<bool,ConfigReadError>;
    fn read_units(&mut self) -> Result<Vec<U>,ConfigReadError>;
    fn verify_eof(&mut self) -> Result<(),ConfigReadError>;

    /// Reads a token and fails unless it equals `expected`
    fn expect_token(&mut self,expected:&str) -> Result<(),ConfigReadError> {
        let t = self.read_token()?;

        if t == expected {
            Ok(())
        } else {
            Err(ConfigReadError::InvalidState(format!("Expected token {}, got {}",expected,t)))
        }
    }
}
/// Writing side of a model stream
pub trait WritePersistence<U> {
    fn write_token(&mut self,t:&str);
    fn write_unit(&mut self,u:U);
    fn write_usize(&mut self,n:usize);
    fn write_bool(&mut self,b:bool);
    fn write_units(&mut self,u:&[U]);
    /// Marks the end of a component (a line break in text form)
    fn end_component(&mut self);
}
pub enum UnitOrMarker<U> {
    Unit(U),
    Token(String),
    Size(usize),
    Flag(bool),
    UnitsStart,
    UnitsEnd,
    ComponentEnd
}
/// Whitespace separated text form
pub struct TextPersistence<U,R> where U: FromStr + Sized, R: BufRead {
    reader:R,
    line:Option<Vec<String>>,
    index:usize,
    data:Vec<UnitOrMarker<U>>
}
impl<U> TextPersistence<U,BufReader<File>> where U: FromStr + Sized {
    pub fn from_file<P: AsRef<Path>>(file:P) -> Result<TextPersistence<U,BufReader<File>>,ConfigReadError> {
        Ok(TextPersistence::new(BufReader::new(OpenOptions::new().read(true).create(false).open(file)?)))
    }
}
impl<U> TextPersistence<U,io::Empty> where U: FromStr + Sized {
    /// Create an instance that is only used for writing
    pub fn writer() -> TextPersistence<U,io::Empty> {
        TextPersistence::new(io::empty())
    }
}
impl<U,R> TextPersistence<U,R> where U: FromStr + Sized, R: BufRead {
    pub fn new(reader:R) -> TextPersistence<U,R> {
        TextPersistence {
            reader:reader,
            line:None,
            index:0usize,
            data:Vec::new()
        }
    }

    fn read_line(&mut self) -> Result<String, ConfigReadError> {
        let mut buf = String::new();
        let n = self.reader.read_line(&mut buf)?;

        buf = buf.trim().to_string();

        if n == 0 {
            Err(ConfigReadError::InvalidState(String::from(
                "End of input has been reached.")))
        } else {
            Ok(buf)
        }
    }

    fn next_token(&mut self) -> Result<String, ConfigReadError> {
        let t = match self.line {
            None => {
                self.index = 0;
                let mut buf = self.read_line()?;

                while buf.is_empty() || buf.starts_with('#') {
                    buf = self.read_line()?;
                }

                let line = buf.split_whitespace().map(|s| s.to_string()).collect::<Vec<String>>();
                let t = line[self.index].clone();
                self.line = Some(line);
                t
            },
            Some(ref line) => {
                line[self.index].clone()
            }
        };

        self.index = self.index + 1;

        if match self.line {
            Some(ref line) => self.index >= line.len(),
            None => false,
        } {
            self.line = None;
        }

        Ok(t)
    }
}
impl<U,R> TextPersistence<U,R> where U: FromStr + Sized + Display, R: BufRead {
    /// Write everything buffered so far
    pub fn save_to<W: Write>(&self,w:&mut W) -> Result<(),io::Error> {
        for u in self.data.iter() {
            match u {
                UnitOrMarker::Unit(u) => {
                    write!(w,"{} ",u)?;
                },
                UnitOrMarker::Token(t) => {
                    write!(w,"{} ",t)?;
                },
                UnitOrMarker::Size(n) => {
                    write!(w,"{} ",n)?;
                },
                UnitOrMarker::Flag(b) => {
                    w.write_all(if *b { b"T " } else { b"F " })?;
                },
                UnitOrMarker::UnitsStart => {
                    w.write_all(b"[ ")?;
                },
                UnitOrMarker::UnitsEnd => {
                    w.write_all(b"] ")?;
                },
                UnitOrMarker::ComponentEnd => {
                    w.write_all(b"\n")?;
                }
            }
        }

        Ok(())
    }
}
impl<U,R> ReadPersistence<U> for TextPersistence<U,R>
    where U: FromStr + Sized, R: BufRead, ConfigReadError: From<<U as FromStr>::Err> {
    fn read_token(&mut self) -> Result<String, ConfigReadError> {
        self.next_token()
    }

    fn read_unit(&mut self) -> Result<U, ConfigReadError> {
        Ok(self.next_token()?.parse::<U>()?)
    }

    fn read_usize(&mut self) -> Result<usize, ConfigReadError> {
        Ok(self.next_token()?.parse::<usize>()?)
    }

    fn read_bool(&mut self) -> Result<bool, ConfigReadError> {
        match &*self.next_token()? {
            "T" | "true" => Ok(true),
            "F" | "false" => Ok(false),
            t => Err(ConfigReadError::InvalidState(format!("Expected a boolean value, got {}",t)))
        }
    }

    fn read_units(&mut self) -> Result<Vec<U>, ConfigReadError> {
        self.expect_token("[")?;

        let mut units = Vec::new();

        loop {
            let t = self.next_token()?;

            if t == "]" {
                return Ok(units);
            }

            units.push(t.parse::<U>()?);
        }
    }

    fn verify_eof(&mut self) -> Result<(),ConfigReadError> {
        if self.line.is_some() {
            return Err(ConfigReadError::InvalidState(
                String::from("Data loaded , but the input has not reached the end.")));
        }

        let mut buf = String::new();

        loop {
            let n = self.reader.read_line(&mut buf)?;

            if n == 0 {
                return Ok(());
            }

            buf = buf.trim().to_string();

            if !buf.is_empty() && !buf.starts_with('#') {
                return Err(ConfigReadError::InvalidState(
                    String::from("Data loaded , but the input has not reached the end.")));
            } else {
                buf.clear();
            }
        }
    }
}
impl<U,R> WritePersistence<U> for TextPersistence<U,R> where U: FromStr + Sized + Copy, R: BufRead {
    fn write_token(&mut self, t: &str) {
        self.data.push(UnitOrMarker::Token(t.to_string()));
    }

    fn write_unit(&mut self, u: U) {
        self.data.push(UnitOrMarker::Unit(u));
    }

    fn write_usize(&mut self, n: usize) {
        self.data.push(UnitOrMarker::Size(n));
    }

    fn write_bool(&mut self, b: bool) {
        self.data.push(UnitOrMarker::Flag(b));
    }

    fn write_units(&mut self, u: &[U]) {
        self.data.push(UnitOrMarker::UnitsStart);

        for &u in u.iter() {
            self.data.push(UnitOrMarker::Unit(u));
        }

        self.data.push(UnitOrMarker::UnitsEnd);
    }

    fn end_component(&mut self) {
        self.data.push(UnitOrMarker::ComponentEnd);
    }
}
impl<U,R> SaveToFile<U> for TextPersistence<U,R> where U: FromStr + Sized + Display, R: BufRead {
    fn save<P: AsRef<Path>>(&self,file:P) -> Result<(),io::Error> {
        let mut bw = BufWriter::new(OpenOptions::new().write(true).create(true).truncate(true).open(file)?);

        self.save_to(&mut bw)?;

        bw.flush()
    }
}
/// Unit types with a fixed-width big-endian binary encoding
pub trait BinaryUnit: Sized {
    const SIZE:usize;

    fn write_be(&self,buf:&mut Vec<u8>);
    fn read_be(buf:&[u8]) -> Self;
}
impl BinaryUnit for f64 {
    const SIZE:usize = 8;

    fn write_be(&self,buf:&mut Vec<u8>) {
        let bits = self.to_bits();

        buf.push((bits >> 56 & 0xff) as u8);
        buf.push((bits >> 48 & 0xff) as u8);
        buf.push((bits >> 40 & 0xff) as u8);
        buf.push((bits >> 32 & 0xff) as u8);
        buf.push((bits >> 24 & 0xff) as u8);
        buf.push((bits >> 16 & 0xff) as u8);
        buf.push((bits >> 8 & 0xff) as u8);
        buf.push((bits & 0xff) as u8);
    }

    fn read_be(buf:&[u8]) -> f64 {
        f64::from_bits(
            (buf[0] as u64) << 56 |
                (buf[1] as u64) << 48 |
                (buf[2] as u64) << 40 |
                (buf[3] as u64) << 32 |
                (buf[4] as u64) << 24 |
                (buf[5] as u64) << 16 |
                (buf[6] as u64) << 8  |
                buf[7] as u64)
    }
}
impl BinaryUnit for f32 {
    const SIZE:usize = 4;

    fn write_be(&self,buf:&mut Vec<u8>) {
        let bits = self.to_bits();

        buf.push((bits >> 24 & 0xff) as u8);
        buf.push((bits >> 16 & 0xff) as u8);
        buf.push((bits >> 8 & 0xff) as u8);
        buf.push((bits & 0xff) as u8);
    }

    fn read_be(buf:&[u8]) -> f32 {
        f32::from_bits(
            (buf[0] as u32) << 24 |
                (buf[1] as u32) << 16 |
                (buf[2] as u32) << 8  |
                buf[3] as u32)
    }
}
/// Upper bound on the length of a token in binary form
pub const MAX_TOKEN_LEN:usize = 256;
/// Binary form: big-endian IEEE bits, sizes as u64, tokens prefixed with a u32 length
pub struct BinPersistence<U,R> where R: Read {
    reader:R,
    data:Vec<u8>,
    u:PhantomData<U>
}
impl<U> BinPersistence<U,BufReader<File>> {
    pub fn from_file<P: AsRef<Path>>(file:P) -> Result<BinPersistence<U,BufReader<File>>, ConfigReadError> {
        Ok(BinPersistence::new(BufReader::new(OpenOptions::new().read(true).create(false).open(file)?)))
    }
}
impl<U> BinPersistence<U,io::Empty> {
    /// Create an instance that is only used for writing
    pub fn writer() -> BinPersistence<U,io::Empty> {
        BinPersistence::new(io::empty())
    }
}
impl<U,R> BinPersistence<U,R> where R: Read {
    pub fn new(reader:R) -> BinPersistence<U,R> {
        BinPersistence {
            reader:reader,
            data:Vec::new(),
            u:PhantomData::<U>
        }
    }

    /// Write everything buffered so far
    pub fn save_to<W: Write>(&self,w:&mut W) -> Result<(),io::Error> {
        w.write_all(&self.data)
    }

    fn read_u64(&mut self) -> Result<u64,ConfigReadError> {
        let mut buf = [0; 8];

        self.reader.read_exact(&mut buf)?;

        Ok(buf.iter().fold(0u64,|acc,&b| acc << 8 | b as u64))
    }

    fn read_u32(&mut self) -> Result<u32,ConfigReadError> {
        let mut buf = [0; 4];

        self.reader.read_exact(&mut buf)?;

        Ok(buf.iter().fold(0u32,|acc,&b| acc << 8 | b as u32))
    }

    fn write_u64(&mut self,v:u64) {
        for s in (0..8).rev() {
            self.data.push((v >> (s * 8) & 0xff) as u8);
        }
    }

    fn write_u32(&mut self,v:u32) {
        for s in (0..4).rev() {
            self.data.push((v >> (s * 8) & 0xff) as u8);
        }
    }
}
impl<U,R> ReadPersistence<U> for BinPersistence<U,R> where U: BinaryUnit, R: Read {
    fn read_token(&mut self) -> Result<String, ConfigReadError> {
        let len = self.read_u32()? as usize;

        if len > MAX_TOKEN_LEN {
            return Err(ConfigReadError::InvalidState(format!(
                "The token length {} exceeds the limit of {} bytes.",len,MAX_TOKEN_LEN)));
        }

        let mut buf = vec![0u8; len];

        self.reader.read_exact(&mut buf)?;

        String::from_utf8(buf).map_err(|_| ConfigReadError::InvalidState(String::from(
            "The token is not valid utf-8.")))
    }

    fn read_unit(&mut self) -> Result<U, ConfigReadError> {
        let mut buf = vec![0u8; U::SIZE];

        self.reader.read_exact(&mut buf)?;

        Ok(U::read_be(&buf))
    }

    fn read_usize(&mut self) -> Result<usize, ConfigReadError> {
        let v = self.read_u64()?;

        usize::try_from(v).map_err(|_| ConfigReadError::InvalidState(format!(
            "The value {} does not fit in usize.",v)))
    }

    fn read_bool(&mut self) -> Result<bool, ConfigReadError> {
        let mut buf = [0u8; 1];

        self.reader.read_exact(&mut buf)?;

        match buf[0] {
            b'T' => Ok(true),
            b'F' => Ok(false),
            b => Err(ConfigReadError::InvalidState(format!("Expected a boolean value, got byte {}",b)))
        }
    }

    fn read_units(&mut self) -> Result<Vec<U>, ConfigReadError> {
        let len = self.read_usize()?;

        (0..len).map(|_| self.read_unit()).collect()
    }

    fn verify_eof(&mut self) -> Result<(), ConfigReadError> {
        let mut buf:[u8; 1] = [0];

        let n = self.reader.read(&mut buf)?;

        if n == 0 {
            Ok(())
        } else {
            Err(ConfigReadError::InvalidState(String::from("Data loaded , but the input has not reached the end.")))
        }
    }
}
impl<U,R> WritePersistence<U> for BinPersistence<U,R> where U: BinaryUnit, R: Read {
    fn write_token(&mut self, t: &str) {
        self.write_u32(t.len() as u32);
        self.data.extend_from_slice(t.as_bytes());
    }

    fn write_unit(&mut self, u: U) {
        u.write_be(&mut self.data);
    }

    fn write_usize(&mut self, n: usize) {
        self.write_u64(n as u64);
    }

    fn write_bool(&mut self, b: bool) {
        self.data.push(if b { b'T' } else { b'F' });
    }

    fn write_units(&mut self, u: &[U]) {
        self.write_u64(u.len() as u64);

        for u in u.iter() {
            u.write_be(&mut self.data);
        }
    }

    fn end_component(&mut self) {}
}
impl<U,R> SaveToFile<U> for BinPersistence<U,R> where R: Read {
    fn save<P: AsRef<Path>>(&self,file:P) -> Result<(),io::Error> {
        let mut bw = BufWriter::new(OpenOptions::new().write(true).create(true).truncate(true).open(file)?);

        self.save_to(&mut bw)?;

        bw.flush()
    }
}
